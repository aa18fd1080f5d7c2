//! Worker error types.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Control channel error: {0}")]
    ChannelError(String),

    #[error("Registration denied by controller")]
    RegistrationDenied,

    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Invalid encryption key: {0}")]
    EncryptionKey(#[from] hex::FromHexError),

    #[error("Media error: {0}")]
    Media(#[from] encast_media::MediaError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] encast_delivery::DeliveryError),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn channel_error(msg: impl Into<String>) -> Self {
        Self::ChannelError(msg.into())
    }

    pub fn upload_failed(msg: impl Into<String>) -> Self {
        Self::UploadFailed(msg.into())
    }
}
