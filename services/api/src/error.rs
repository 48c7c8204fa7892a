//! services/api/src/error.rs
//!
//! Defines the primary error type for the entire API service, plus the mapping
//! from port and guide errors onto HTTP responses.

use crate::config::ConfigError;
use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use guide_core::{PortError, TierError};
use serde_json::json;

/// The primary error type for the `api` service.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Represents an error that occurred during configuration loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Represents an error that propagated up from one of the core service ports.
    #[error("Service Port Error: {0}")]
    Port(#[from] PortError),

    /// The section catalog could not be loaded or a tier/key was rejected.
    #[error("Section catalog error: {0}")]
    Tier(#[from] TierError),

    /// Represents an error from the underlying database library.
    #[error("Database Error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration Error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Represents a standard Input/Output error (e.g., binding to a network socket).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A catch-all for any other unexpected errors.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}

/// Errors raised by the guide services and surfaced to HTTP callers.
#[derive(Debug, thiserror::Error)]
pub enum GuideError {
    /// Rejected before any mutation: missing fields, bad identifiers, bad keys.
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error(transparent)]
    Port(PortError),
}

impl From<PortError> for GuideError {
    fn from(e: PortError) -> Self {
        match e {
            PortError::NotFound(msg) => GuideError::NotFound(msg),
            PortError::Invalid(msg) => GuideError::Validation(msg),
            other => GuideError::Port(other),
        }
    }
}

/// Malformed or incomplete request bodies are validation failures like any
/// other, reported with the same JSON error shape.
impl From<JsonRejection> for GuideError {
    fn from(rejection: JsonRejection) -> Self {
        GuideError::Validation(rejection.body_text())
    }
}

impl From<TierError> for GuideError {
    fn from(e: TierError) -> Self {
        GuideError::Validation(e.to_string())
    }
}

impl GuideError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GuideError::Validation(_) => StatusCode::BAD_REQUEST,
            GuideError::NotFound(_) => StatusCode::NOT_FOUND,
            GuideError::Port(PortError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            GuideError::Port(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GuideError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        let body = Json(json!({ "status": "error", "message": self.to_string() }));
        (status, body).into_response()
    }
}
