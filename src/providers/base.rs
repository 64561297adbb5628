//! Base LLM provider interface.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

/// Response from an LLM provider.
#[derive(Debug, Clone)]
pub struct LLMResponse {
    /// Visible answer text only; reasoning traces never land here.
    pub content: Option<String>,
    /// Chain of thought the endpoint returned beside the answer, if any.
    pub reasoning_content: Option<String>,
    pub finish_reason: String,
    pub usage: HashMap<String, i64>,
    /// The decoded response body, kept for callers that print it verbatim.
    pub raw: serde_json::Value,
}

impl LLMResponse {
    /// Message text, or an empty string when the model returned none.
    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }
}

/// Abstract base trait for LLM providers.
///
/// Errors are `ProviderError` values embedded in `anyhow::Error`; callers can
/// `downcast_ref::<ProviderError>()` when they need to branch on the kind.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Send a non-streaming chat request.
    ///
    /// # Arguments
    /// * `messages` - List of message objects with `role` and `content`.
    /// * `model` - Model identifier; `None` uses the provider default.
    async fn chat(&self, messages: &[serde_json::Value], model: Option<&str>) -> Result<LLMResponse>;

    /// Check that the endpoint answers at all. Default: assume reachable.
    async fn health_check(&self) -> Result<()> {
        Ok(())
    }

    /// Get the default model for this provider.
    fn get_default_model(&self) -> &str;

    /// Get the API base URL (for logging).
    fn get_api_base(&self) -> Option<&str> {
        None
    }
}

/// Build a single-turn message list with an optional system prompt.
pub fn single_turn(system: Option<&str>, user: &str) -> Vec<serde_json::Value> {
    let mut messages = Vec::with_capacity(2);
    if let Some(sys) = system.filter(|s| !s.is_empty()) {
        messages.push(serde_json::json!({"role": "system", "content": sys}));
    }
    messages.push(serde_json::json!({"role": "user", "content": user}));
    messages
}

static THINK_BLOCK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<(think|thinking)>.*?</(think|thinking)>\n?").expect("valid think regex")
});

/// Remove `<think>…</think>` / `<thinking>…</thinking>` reasoning blocks and trim.
///
/// An unterminated opening tag drops everything after it: the model never got
/// to a visible answer.
pub fn strip_think_blocks(text: &str) -> String {
    let cleaned = THINK_BLOCK_RE.replace_all(text, "");
    let visible = match cleaned.find("<think>").or_else(|| cleaned.find("<thinking>")) {
        Some(idx) => &cleaned[..idx],
        None => &cleaned[..],
    };
    visible.trim().to_string()
}
