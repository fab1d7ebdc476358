//! Process lifecycle for services on the saga bus.
//!
//! Provides environment [`Config`], telemetry setup, the [`ServiceRuntime`]
//! that owns a service's broker connection, subscriber and startup messages,
//! and signal-driven graceful shutdown.

pub mod config;
pub mod error;
pub mod service;
pub mod signal;
pub mod tap;
pub mod telemetry;

use std::sync::Arc;

use dedup::{DedupCache, RedisSetStore};

pub use config::{Config, LogFormat};
pub use error::{ConfigError, Result, RuntimeError};
pub use service::{ServiceRuntime, ServiceRuntimeBuilder, StartupMessage};
pub use signal::shutdown_signal;
pub use tap::TapHandler;

/// Connects to the configured Redis and returns this service's
/// processed-message cache.
pub async fn connect_dedup_cache(config: &Config) -> Result<DedupCache> {
    let store = RedisSetStore::connect(&config.redis_url).await?;
    Ok(DedupCache::new(Arc::new(store), &config.service_id()))
}
