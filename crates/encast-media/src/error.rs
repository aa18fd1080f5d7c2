//! Error types for encoder operations.

use thiserror::Error;

/// Result type for encoder operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur while supervising the encoder.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("Encoder not found: {0}")]
    EncoderNotFound(String),

    #[error("Probe tool not found: {0}")]
    ProbeNotFound(String),

    #[error("Failed to spawn encoder: {message}")]
    SpawnFailed { message: String },

    #[error("Probe command failed: {message}")]
    ProbeFailed {
        message: String,
        stderr: Option<String>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MediaError {
    /// Create a spawn failure error.
    pub fn spawn_failed(message: impl Into<String>) -> Self {
        Self::SpawnFailed {
            message: message.into(),
        }
    }

    /// Create a probe failure error.
    pub fn probe_failed(message: impl Into<String>, stderr: Option<String>) -> Self {
        Self::ProbeFailed {
            message: message.into(),
            stderr,
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}
