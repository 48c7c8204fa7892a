//! services/worker/src/adapters/mod.rs
//!
//! Outbound adapters: the model backends that implement
//! `TextGenerationService`, the guide API client and the Discord sink.

pub mod claude;
pub mod discord;
pub mod gemini;
pub mod guide_api;
pub mod ollama;

pub use claude::ClaudeAdapter;
pub use discord::DiscordNotifier;
pub use gemini::GeminiAdapter;
pub use guide_api::GuideApiClient;
pub use ollama::OllamaAdapter;

use guide_core::PortError;
use reqwest::StatusCode;

/// Connection problems and timeouts are worth retrying later; anything else
/// points at a bad request or response.
pub(crate) fn transport_error(err: reqwest::Error) -> PortError {
    if err.is_timeout() || err.is_connect() {
        PortError::Unavailable(err.to_string())
    } else {
        PortError::Unexpected(err.to_string())
    }
}

pub(crate) fn status_error(service: &str, status: StatusCode, body: &str) -> PortError {
    let message = format!("{} returned {}: {}", service, status, body.trim());
    match status {
        StatusCode::NOT_FOUND => PortError::NotFound(message),
        StatusCode::TOO_MANY_REQUESTS => PortError::Unavailable(message),
        s if s.is_server_error() => PortError::Unavailable(message),
        s if s.is_client_error() => PortError::Invalid(message),
        _ => PortError::Unexpected(message),
    }
}
