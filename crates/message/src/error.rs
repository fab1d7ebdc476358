//! Message error types.

use thiserror::Error;

/// Errors raised while building, mutating, or decoding a message.
#[derive(Debug, Error)]
pub enum MessageError {
    /// The payload is not a valid message.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The service already appended its decoration.
    #[error("Message already decorated by {service}")]
    AlreadyDecorated { service: String },

    /// Context entries are append-only.
    #[error("Context property already set: {key}")]
    ContextKeyExists { key: String },
}

/// Result type for message operations.
pub type Result<T> = std::result::Result<T, MessageError>;
