//! Error handling module
//!
//! Unified error type for the relay binary and its control surface.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayCliError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("relay chain error: {0}")]
    Stage(#[from] relay_stage::StageError),
    #[error("malformed producer payload: {0}")]
    Payload(#[from] event_codec::CodecError),
    #[error("no live producer context")]
    ProducerUnavailable,
}

impl RelayCliError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Whether repeating the same operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::ProducerUnavailable)
    }
}

pub type Result<T> = std::result::Result<T, RelayCliError>;
