//! Error types for the OMRS event core

use thiserror::Error;

#[derive(Error, Debug)]
pub enum OmrsError {
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    #[error("Invalid conflict report: {0}")]
    InvalidConflict(String),

    #[error("Invalid TypeDef patch: {0}")]
    InvalidPatch(String),

    #[error("Decode error: {0}")]
    DecodeError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Event processing error: {0}")]
    ProcessingError(String),

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

pub type Result<T> = std::result::Result<T, OmrsError>;

impl From<anyhow::Error> for OmrsError {
    fn from(err: anyhow::Error) -> Self {
        OmrsError::InternalError(err.to_string())
    }
}

impl OmrsError {
    pub fn invalid_event(message: impl Into<String>) -> Self {
        OmrsError::InvalidEvent(message.into())
    }

    pub fn processing(message: impl Into<String>) -> Self {
        OmrsError::ProcessingError(message.into())
    }
}
