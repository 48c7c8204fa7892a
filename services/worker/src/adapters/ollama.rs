//! services/worker/src/adapters/ollama.rs
//!
//! Local Ollama backend, reached through its OpenAI-compatible `/v1`
//! endpoint with the `async-openai` client.

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use guide_core::{ModelProvider, PortError, PortResult, TextGenerationService};
use tracing::debug;

const SYSTEM_PROMPT: &str =
    "You are an expert Magic: The Gathering player writing one section of a card guide.";

#[derive(Clone)]
pub struct OllamaAdapter {
    client: Client<OpenAIConfig>,
}

impl OllamaAdapter {
    pub fn new(ollama_url: &str) -> Self {
        // Ollama ignores the key, but the client always sends one.
        let config = OpenAIConfig::new()
            .with_api_base(api_base(ollama_url))
            .with_api_key("ollama");
        Self {
            client: Client::with_config(config),
        }
    }
}

/// `http://host:11434` and `http://host:11434/v1/` both become
/// `http://host:11434/v1`.
fn api_base(url: &str) -> String {
    let trimmed = url.trim().trim_end_matches('/');
    if trimmed.ends_with("/v1") {
        trimmed.to_string()
    } else {
        format!("{}/v1", trimmed)
    }
}

fn map_openai_error(err: OpenAIError) -> PortError {
    match err {
        OpenAIError::Reqwest(e) => PortError::Unavailable(e.to_string()),
        other => PortError::Unexpected(other.to_string()),
    }
}

#[async_trait]
impl TextGenerationService for OllamaAdapter {
    fn provider(&self) -> ModelProvider {
        ModelProvider::Ollama
    }

    async fn generate(&self, model: &str, prompt: &str) -> PortResult<String> {
        let messages = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(SYSTEM_PROMPT)
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(prompt)
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
        ];

        let request = CreateChatCompletionRequestArgs::default()
            .model(model)
            .messages(messages)
            .n(1)
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        debug!(model, "Ollama request");
        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(map_openai_error)?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| {
                PortError::Unexpected("Ollama response contained no text content".to_string())
            })
    }
}
