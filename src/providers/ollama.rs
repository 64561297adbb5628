//! Ollama-compatible local model-serving provider (the answer endpoint).
//!
//! Uses the native REST API: `POST /api/chat` with `stream: false` for
//! completions and `GET /api/tags` as the startup health check.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};

use super::base::{LLMProvider, LLMResponse};
use crate::errors::ProviderError;

/// Health checks get a short timeout of their own; the serving timeout can be minutes.
const HEALTH_TIMEOUT_SECS: u64 = 10;

pub struct OllamaProvider {
    host: String,
    default_model: String,
    client: Client,
}

impl OllamaProvider {
    pub fn new(host: &str, default_model: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::HttpError(e.to_string()))?;
        Ok(Self {
            host: normalize_host(host),
            default_model: default_model.to_string(),
            client,
        })
    }
}

/// Accept bare `host:port` (as `OLLAMA_HOST` often is) as well as full URLs.
fn normalize_host(host: &str) -> String {
    let trimmed = host.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    }
}

#[async_trait]
impl LLMProvider for OllamaProvider {
    async fn chat(&self, messages: &[serde_json::Value], model: Option<&str>) -> Result<LLMResponse> {
        let model = model.unwrap_or(&self.default_model);
        let url = format!("{}/api/chat", self.host);
        let body = serde_json::json!({
            "model": model,
            "messages": messages,
            "stream": false,
        });

        debug!("ollama chat: url={} model={}", url, model);

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::HttpError(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ProviderError::ResponseReadError(e.to_string()))?;

        if !status.is_success() {
            warn!("serving endpoint returned status {} (host={}): {}", status, self.host, text);
            return Err(ProviderError::from_status(status.as_u16(), text).into());
        }

        let data: serde_json::Value =
            serde_json::from_str(&text).map_err(|e| ProviderError::JsonParseError(e.to_string()))?;
        Ok(parse_chat_response(data)?)
    }

    async fn health_check(&self) -> Result<()> {
        let url = format!("{}/api/tags", self.host);
        let resp = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(HEALTH_TIMEOUT_SECS))
            .send()
            .await
            .map_err(|e| {
                warn!("health check failed for {}: {}", url, e);
                ProviderError::Unreachable(self.host.clone())
            })?;
        if !resp.status().is_success() {
            warn!("health check for {} returned {}", url, resp.status());
            return Err(ProviderError::Unreachable(self.host.clone()).into());
        }
        Ok(())
    }

    fn get_default_model(&self) -> &str {
        &self.default_model
    }

    fn get_api_base(&self) -> Option<&str> {
        Some(&self.host)
    }
}

/// Parse `{"message": {"content": ...}, "done_reason": ..., "eval_count": ...}`.
pub(crate) fn parse_chat_response(data: serde_json::Value) -> Result<LLMResponse, ProviderError> {
    let content = data
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or(ProviderError::EmptyResponse)?;

    let reasoning_content = data
        .get("message")
        .and_then(|m| m.get("thinking"))
        .and_then(|c| c.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    let finish_reason = data
        .get("done_reason")
        .and_then(|v| v.as_str())
        .unwrap_or("stop")
        .to_string();

    let mut usage = HashMap::new();
    if let Some(n) = data.get("prompt_eval_count").and_then(|v| v.as_i64()) {
        usage.insert("prompt_tokens".to_string(), n);
    }
    if let Some(n) = data.get("eval_count").and_then(|v| v.as_i64()) {
        usage.insert("completion_tokens".to_string(), n);
    }

    Ok(LLMResponse {
        content: Some(content),
        reasoning_content,
        finish_reason,
        usage,
        raw: data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn serve_once(status_line: &'static str, body: &'static str) -> u16 {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                if let Ok((mut stream, _)) = listener.accept().await {
                    use tokio::io::{AsyncReadExt, AsyncWriteExt};
                    let mut buf = [0u8; 4096];
                    let _ = stream.read(&mut buf).await;
                    let resp = format!(
                        "HTTP/1.1 {}\r\nConnection: close\r\nContent-Length: {}\r\n\r\n{}",
                        status_line,
                        body.len(),
                        body
                    );
                    stream.write_all(resp.as_bytes()).await.ok();
                }
            }
        });
        port
    }

    #[test]
    fn test_normalize_host() {
        assert_eq!(normalize_host("localhost:11434"), "http://localhost:11434");
        assert_eq!(normalize_host("http://gpu-node:11434/"), "http://gpu-node:11434");
    }

    #[test]
    fn test_parse_chat_response() {
        let data = serde_json::json!({
            "message": {"role": "assistant", "content": "Harald Fairhair."},
            "done_reason": "stop",
            "prompt_eval_count": 50,
            "eval_count": 6
        });
        let resp = parse_chat_response(data).unwrap();
        assert_eq!(resp.text(), "Harald Fairhair.");
        assert_eq!(resp.usage.get("completion_tokens"), Some(&6));
    }

    #[test]
    fn test_parse_chat_response_missing_message() {
        let data = serde_json::json!({"error": "model not found"});
        assert!(matches!(parse_chat_response(data), Err(ProviderError::EmptyResponse)));
    }

    #[tokio::test]
    async fn test_health_check_ok() {
        let port = serve_once("200 OK", r#"{"models":[]}"#).await;
        let provider =
            OllamaProvider::new(&format!("127.0.0.1:{}", port), "m", Duration::from_secs(5)).unwrap();
        assert!(provider.health_check().await.is_ok());
    }

    #[tokio::test]
    async fn test_health_check_unreachable() {
        // Bind then drop to get a port nothing listens on.
        let port = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let provider =
            OllamaProvider::new(&format!("127.0.0.1:{}", port), "m", Duration::from_secs(2)).unwrap();
        let err = provider.health_check().await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ProviderError>(),
            Some(ProviderError::Unreachable(_))
        ));
    }

    #[tokio::test]
    async fn test_chat_server_error() {
        let port = serve_once("500 Internal Server Error", "boom").await;
        let provider =
            OllamaProvider::new(&format!("127.0.0.1:{}", port), "m", Duration::from_secs(5)).unwrap();
        let msgs = vec![serde_json::json!({"role": "user", "content": "q"})];
        let err = provider.chat(&msgs, None).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ProviderError>(),
            Some(ProviderError::ServerError { status: 500, .. })
        ));
    }
}
