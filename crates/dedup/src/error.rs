use thiserror::Error;

/// Errors raised by the dedup store.
///
/// Callers must never read an error as "not processed".
#[derive(Debug, Error)]
pub enum CacheError {
    /// The store rejected or could not serve the request.
    #[error("Cache store error: {0}")]
    Store(String),

    /// A Redis error occurred.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Result type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;
