//! Error types for artifact delivery.

use thiserror::Error;

/// Result type for delivery operations.
pub type DeliveryResult<T> = Result<T, DeliveryError>;

/// Errors that can occur while delivering artifacts.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Destination rejected {key}: status {status}")]
    Rejected { key: String, status: u16 },

    #[error("Delivery of {key} failed after {attempts} attempts: {last_error}")]
    Exhausted {
        key: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Invalid destination key: {0}")]
    InvalidKey(String),

    #[error("Watcher error: {0}")]
    Watch(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DeliveryError {
    /// Create a rejection error.
    pub fn rejected(key: impl Into<String>, status: u16) -> Self {
        Self::Rejected {
            key: key.into(),
            status,
        }
    }

    /// Create an exhausted-retries error.
    pub fn exhausted(key: impl Into<String>, attempts: u32, last_error: impl Into<String>) -> Self {
        Self::Exhausted {
            key: key.into(),
            attempts,
            last_error: last_error.into(),
        }
    }

    /// Create an invalid key error.
    pub fn invalid_key(message: impl Into<String>) -> Self {
        Self::InvalidKey(message.into())
    }

    /// Create a watcher error.
    pub fn watch(message: impl Into<String>) -> Self {
        Self::Watch(message.into())
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}
