//! Saga error types.

use dedup::CacheError;
use message::MessageError;
use thiserror::Error;

/// Errors that can occur while validating or running a saga step.
#[derive(Debug, Error)]
pub enum SagaError {
    /// The processed-message cache could not be consulted or updated.
    #[error("Dedup cache error: {0}")]
    Cache(#[from] CacheError),

    /// A compensating action failed.
    #[error("Rollback failed: {0}")]
    Rollback(String),

    /// A saga step failed.
    #[error("Saga step '{step}' failed: {reason}")]
    StepFailed { step: String, reason: String },

    /// The message could not be decorated.
    #[error("Message error: {0}")]
    Message(#[from] MessageError),
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
