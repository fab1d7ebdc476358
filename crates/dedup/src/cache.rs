//! Processed-message cache for one service instance group.

use std::sync::Arc;
use std::time::Duration;

use common::{CorrelationId, ServiceId, format_error};

use crate::store::SetStore;
use crate::{CacheError, Result};

/// How long a processed correlation ID is remembered after the last insert.
pub const PROCESSED_MESSAGE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Remembers which correlation IDs this service has fully handled.
///
/// All instances of one service version share the set
/// `"<service>-<version>:processedMessages"`. The cache exists to tell a
/// first delivery of an errored saga apart from a redelivery; store errors
/// are always returned to the caller, never reported as "not processed".
#[derive(Clone)]
pub struct DedupCache {
    store: Arc<dyn SetStore>,
    key: String,
    ttl: Duration,
}

impl DedupCache {
    /// Creates a cache for `service` over `store`.
    pub fn new(store: Arc<dyn SetStore>, service: &ServiceId) -> Self {
        Self {
            store,
            key: format!("{service}:processedMessages"),
            ttl: PROCESSED_MESSAGE_TTL,
        }
    }

    /// Overrides the set's time-to-live.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Returns the store key of the processed-messages set.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Records `correlation_id` as fully handled.
    ///
    /// The expiry of the whole set is reset on every insert, so under steady
    /// traffic no entry ever expires.
    // TODO: decide with the service owners whether the TTL should only be
    // set when the set is created; changing it alters retention for every
    // service sharing a key.
    #[tracing::instrument(skip(self), fields(key = %self.key))]
    pub async fn add_processed_message(&self, correlation_id: &CorrelationId) -> Result<()> {
        let recorded = async {
            self.store
                .add_member(&self.key, correlation_id.as_str())
                .await?;
            tracing::debug!("added correlation id to processed messages");

            self.store.expire(&self.key, self.ttl.as_secs()).await?;
            tracing::debug!(ttl_secs = self.ttl.as_secs(), "reset processed messages ttl");
            Ok::<_, CacheError>(())
        };
        recorded.await.inspect_err(|e| {
            metrics::counter!("dedup_cache_errors_total").increment(1);
            tracing::error!(error = %format_error(e), "failed to record processed message");
        })
    }

    /// Returns true if `correlation_id` was recorded as fully handled.
    #[tracing::instrument(skip(self), fields(key = %self.key))]
    pub async fn has_processed_message(&self, correlation_id: &CorrelationId) -> Result<bool> {
        let processed = self
            .store
            .is_member(&self.key, correlation_id.as_str())
            .await
            .inspect_err(|e| {
                metrics::counter!("dedup_cache_errors_total").increment(1);
                tracing::error!(error = %format_error(e), "failed to check processed messages");
            })?;
        tracing::debug!(processed, "checked processed messages");
        Ok(processed)
    }
}

impl std::fmt::Debug for DedupCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DedupCache")
            .field("key", &self.key)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}
