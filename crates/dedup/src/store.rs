use async_trait::async_trait;

use crate::Result;

/// A key/value store with set values, as used for dedup bookkeeping.
///
/// Implementations must make `add_member` atomic; nothing else about the
/// store is assumed to be linearizable.
#[async_trait]
pub trait SetStore: Send + Sync {
    /// Adds `member` to the set at `key`, creating the set if needed.
    ///
    /// Returns true if the member was not present before.
    async fn add_member(&self, key: &str, member: &str) -> Result<bool>;

    /// Tests whether `member` is in the set at `key`.
    async fn is_member(&self, key: &str, member: &str) -> Result<bool>;

    /// Sets the time-to-live of the whole set at `key`, replacing any
    /// previous expiry. Returns false if the key does not exist.
    async fn expire(&self, key: &str, seconds: u64) -> Result<bool>;
}
