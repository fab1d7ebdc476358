//! Runtime error types.

use broker::BrokerError;
use dedup::CacheError;
use pipeline::PipelineError;
use thiserror::Error;

/// Missing or malformed environment configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A required variable is not set.
    #[error("Missing required environment variable {0}")]
    Missing(&'static str),

    /// A variable is set to a value that cannot be used.
    #[error("Invalid value '{value}' for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Errors that stop a service from starting.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Dedup cache error: {0}")]
    Cache(#[from] CacheError),

    /// Logging or metrics could not be installed.
    #[error("Telemetry error: {0}")]
    Telemetry(String),
}

/// Result type for runtime operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;
