//! Pipeline error types.

use broker::BrokerError;
use message::MessageError;
use thiserror::Error;

/// Errors that can occur while setting up or tearing down the pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The broker refused a connection or topology operation.
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// A failure reported by one message handler.
///
/// Handler failures are isolated: they are logged and counted, never stop the
/// remaining handlers and never prevent the acknowledgement.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The message could not be decorated or encoded.
    #[error("Message error: {0}")]
    Message(#[from] MessageError),

    /// A broker operation inside the handler failed.
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    /// A handler-specific failure.
    #[error("Handler error: {0}")]
    Failed(String),

    /// Any other error raised by the handler.
    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl HandlerError {
    /// Wraps an arbitrary error, keeping its source chain for the error report.
    pub fn other(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Other(Box::new(err))
    }
}
