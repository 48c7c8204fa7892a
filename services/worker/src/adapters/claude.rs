//! services/worker/src/adapters/claude.rs
//!
//! Anthropic Claude backend over the Messages API.

use super::{status_error, transport_error};
use async_trait::async_trait;
use guide_core::{ModelProvider, PortError, PortResult, TextGenerationService};
use serde_json::json;
use std::time::Duration;
use tracing::debug;

const MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 2048;

pub struct ClaudeAdapter {
    client: reqwest::Client,
    api_key: String,
}

impl ClaudeAdapter {
    pub fn new(api_key: String, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: reqwest::Client::builder().timeout(timeout).build()?,
            api_key,
        })
    }

    fn build_request_body(model: &str, prompt: &str) -> serde_json::Value {
        json!({
            "model": model,
            "max_tokens": MAX_TOKENS,
            "messages": [{ "role": "user", "content": prompt }],
        })
    }

    fn extract_text(resp: &serde_json::Value) -> PortResult<String> {
        let blocks = resp["content"]
            .as_array()
            .ok_or_else(|| PortError::Unexpected("missing content blocks".to_string()))?;
        Ok(blocks
            .iter()
            .filter(|b| b["type"] == "text")
            .filter_map(|b| b["text"].as_str())
            .collect::<Vec<_>>()
            .join(""))
    }
}

#[async_trait]
impl TextGenerationService for ClaudeAdapter {
    fn provider(&self) -> ModelProvider {
        ModelProvider::Claude
    }

    async fn generate(&self, model: &str, prompt: &str) -> PortResult<String> {
        debug!(model, "Claude request");

        let response = self
            .client
            .post(MESSAGES_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&Self::build_request_body(model, prompt))
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error("claude", status, &body));
        }

        let resp: serde_json::Value = response.json().await.map_err(transport_error)?;
        Self::extract_text(&resp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_uses_single_user_message() {
        let body = ClaudeAdapter::build_request_body("claude-3-5-haiku-latest", "Explain Sol Ring.");
        assert_eq!(body["model"], "claude-3-5-haiku-latest");
        assert_eq!(body["max_tokens"], MAX_TOKENS);
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["role"], "user");
        assert_eq!(messages[0]["content"], "Explain Sol Ring.");
        assert!(body.get("system").is_none());
    }

    #[test]
    fn only_text_blocks_are_kept() {
        let resp = json!({
            "content": [
                { "type": "text", "text": "Tap for two." },
                { "type": "tool_use", "id": "x" },
                { "type": "text", "text": " Colorless." }
            ]
        });
        assert_eq!(ClaudeAdapter::extract_text(&resp).unwrap(), "Tap for two. Colorless.");
    }
}
