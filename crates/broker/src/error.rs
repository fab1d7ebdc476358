use thiserror::Error;

/// Errors raised by the broker transport.
#[derive(Debug, Clone, Error)]
pub enum BrokerError {
    /// The broker could not be reached or the connection was refused.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Every connection attempt failed.
    #[error("Connection attempts exhausted after {attempts} tries: {last_error}")]
    ConnectionExhausted { attempts: u32, last_error: String },

    /// A channel operation failed; the channel should be presumed degraded.
    #[error("Channel error: {0}")]
    Channel(String),

    /// The channel or connection was already closed.
    #[error("Channel closed")]
    Closed,
}

/// Result type for broker operations.
pub type Result<T> = std::result::Result<T, BrokerError>;
