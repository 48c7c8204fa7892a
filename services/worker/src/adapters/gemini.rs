//! services/worker/src/adapters/gemini.rs
//!
//! Google Gemini backend over the `generateContent` REST endpoint.

use super::{status_error, transport_error};
use async_trait::async_trait;
use guide_core::{ModelProvider, PortError, PortResult, TextGenerationService};
use serde_json::json;
use std::time::Duration;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const MAX_OUTPUT_TOKENS: u32 = 2048;
const TEMPERATURE: f32 = 0.7;

pub struct GeminiAdapter {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl GeminiAdapter {
    pub fn new(api_key: String, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: reqwest::Client::builder().timeout(timeout).build()?,
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    fn build_request_body(prompt: &str) -> serde_json::Value {
        json!({
            "contents": [{
                "role": "user",
                "parts": [{ "text": prompt }],
            }],
            "generationConfig": {
                "temperature": TEMPERATURE,
                "maxOutputTokens": MAX_OUTPUT_TOKENS,
            },
        })
    }

    /// Concatenates every text part of the first candidate.
    fn extract_text(resp: &serde_json::Value) -> PortResult<String> {
        let parts = resp["candidates"][0]["content"]["parts"]
            .as_array()
            .ok_or_else(|| {
                PortError::Unexpected("missing candidates[0].content.parts".to_string())
            })?;
        Ok(parts
            .iter()
            .filter_map(|p| p["text"].as_str())
            .collect::<Vec<_>>()
            .join(""))
    }
}

#[async_trait]
impl TextGenerationService for GeminiAdapter {
    fn provider(&self) -> ModelProvider {
        ModelProvider::Gemini
    }

    async fn generate(&self, model: &str, prompt: &str) -> PortResult<String> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, model
        );
        debug!(model, "Gemini request");

        let response = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&Self::build_request_body(prompt))
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error("gemini", status, &body));
        }

        let resp: serde_json::Value = response.json().await.map_err(transport_error)?;
        Self::extract_text(&resp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_carries_prompt_and_generation_config() {
        let body = GeminiAdapter::build_request_body("Explain Sol Ring.");

        let contents = body["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 1);
        assert_eq!(contents[0]["role"], "user");
        assert_eq!(contents[0]["parts"][0]["text"], "Explain Sol Ring.");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], MAX_OUTPUT_TOKENS);
        let temp = body["generationConfig"]["temperature"].as_f64().unwrap();
        assert!((temp - 0.7).abs() < 1e-6);
    }

    #[test]
    fn response_text_joins_parts() {
        let resp = json!({
            "candidates": [{ "content": { "parts": [{ "text": "Hello " }, { "text": "world" }] } }]
        });
        assert_eq!(GeminiAdapter::extract_text(&resp).unwrap(), "Hello world");

        let blocked = json!({ "promptFeedback": { "blockReason": "SAFETY" } });
        assert!(GeminiAdapter::extract_text(&blocked).is_err());
    }
}
