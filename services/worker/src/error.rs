//! services/worker/src/error.rs
//!
//! Error types for the worker. Generation failures are per-section and never
//! stop the loop; `WorkerError` covers bad startup configuration.

use guide_core::PortError;
use std::time::Duration;

/// Why a single section could not be produced.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("Model backend unavailable: {0}")]
    Unavailable(String),
    #[error("Generation timed out after {0:?}")]
    Timeout(Duration),
    #[error("Generated text is too short ({length} characters)")]
    Degenerate { length: usize },
    #[error("Model backend error: {0}")]
    Backend(String),
}

impl From<PortError> for GenerationError {
    fn from(err: PortError) -> Self {
        match err {
            PortError::Unavailable(msg) => GenerationError::Unavailable(msg),
            other => GenerationError::Backend(other.to_string()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Invalid configuration: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_ports_stay_unavailable() {
        let err = GenerationError::from(PortError::Unavailable("connection refused".into()));
        assert!(matches!(err, GenerationError::Unavailable(_)));

        let err = GenerationError::from(PortError::Unexpected("bad json".into()));
        assert!(matches!(err, GenerationError::Backend(ref m) if m.contains("bad json")));
    }
}
