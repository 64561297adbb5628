//! OpenAI-compatible chat completions provider (the grading endpoint).
//!
//! Calls any endpoint that implements the OpenAI chat completions request and
//! response format directly via reqwest, authenticated with a bearer key.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};

use super::base::{strip_think_blocks, LLMProvider, LLMResponse};
use crate::errors::ProviderError;

/// An LLM provider that talks to an OpenAI-compatible chat completions URL.
pub struct OpenAICompatProvider {
    api_key: String,
    /// Full URL of the chat completions route.
    url: String,
    default_model: String,
    client: Client,
}

impl OpenAICompatProvider {
    /// Create a new provider.
    ///
    /// `url` is the complete chat completions URL, e.g.
    /// `https://host/api/chat/completions`.
    pub fn new(api_key: &str, url: &str, default_model: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::HttpError(e.to_string()))?;
        Ok(Self {
            api_key: api_key.to_string(),
            url: url.trim_end_matches('/').to_string(),
            default_model: default_model.to_string(),
            client,
        })
    }
}

#[async_trait]
impl LLMProvider for OpenAICompatProvider {
    async fn chat(&self, messages: &[serde_json::Value], model: Option<&str>) -> Result<LLMResponse> {
        let model = model.unwrap_or(&self.default_model);
        let body = serde_json::json!({
            "model": model,
            "messages": messages,
        });

        debug!("chat: url={} model={} messages={}", self.url, model, messages.len());

        let response = self
            .client
            .post(&self.url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                warn!("HTTP request to judge failed (url={}): {}", self.url, e);
                ProviderError::HttpError(e.to_string())
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ProviderError::ResponseReadError(e.to_string()))?;

        if !status.is_success() {
            warn!("judge API returned status {} (url={}): {}", status, self.url, text);
            return Err(ProviderError::from_status(status.as_u16(), text).into());
        }

        let data: serde_json::Value =
            serde_json::from_str(&text).map_err(|e| ProviderError::JsonParseError(e.to_string()))?;
        Ok(parse_response(data)?)
    }

    fn get_default_model(&self) -> &str {
        &self.default_model
    }

    fn get_api_base(&self) -> Option<&str> {
        Some(&self.url)
    }
}

/// Parse an OpenAI chat completions response body.
///
/// Visible content has inline think blocks removed. `reasoning_content` (or
/// `reasoning`) is kept apart, so a reply cut off mid-thought has no content.
pub(crate) fn parse_response(data: serde_json::Value) -> Result<LLMResponse, ProviderError> {
    let choice = data
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .ok_or(ProviderError::EmptyResponse)?;
    let message = choice.get("message").cloned().unwrap_or_default();
    let finish_reason = choice
        .get("finish_reason")
        .and_then(|v| v.as_str())
        .unwrap_or("stop")
        .to_string();

    let content = message
        .get("content")
        .and_then(|v| v.as_str())
        .map(strip_think_blocks)
        .filter(|s| !s.is_empty());
    let reasoning_content = message
        .get("reasoning_content")
        .or_else(|| message.get("reasoning"))
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    let mut usage = HashMap::new();
    if let Some(u) = data.get("usage").and_then(|u| u.as_object()) {
        for (key, value) in u {
            if let Some(n) = value.as_i64() {
                usage.insert(key.clone(), n);
            }
        }
    }

    Ok(LLMResponse {
        content,
        reasoning_content,
        finish_reason,
        usage,
        raw: data,
    })
}
