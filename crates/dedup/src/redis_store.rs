//! Redis-backed set store.

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use crate::Result;
use crate::store::SetStore;

/// Set store over a Redis connection that reconnects on its own.
#[derive(Clone)]
pub struct RedisSetStore {
    connection: ConnectionManager,
}

impl RedisSetStore {
    /// Connects to Redis at `url` (`redis://[:password@]host:port`).
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let connection = ConnectionManager::new(client).await.inspect_err(|e| {
            tracing::error!(error = %e, "failed to connect to Redis");
        })?;
        tracing::info!("connected to Redis");
        Ok(Self { connection })
    }

    /// Wraps an existing connection manager.
    pub fn new(connection: ConnectionManager) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl SetStore for RedisSetStore {
    async fn add_member(&self, key: &str, member: &str) -> Result<bool> {
        let mut connection = self.connection.clone();
        let added: i64 = connection.sadd(key, member).await?;
        Ok(added > 0)
    }

    async fn is_member(&self, key: &str, member: &str) -> Result<bool> {
        let mut connection = self.connection.clone();
        Ok(connection.sismember(key, member).await?)
    }

    async fn expire(&self, key: &str, seconds: u64) -> Result<bool> {
        let mut connection = self.connection.clone();
        let seconds = i64::try_from(seconds).unwrap_or(i64::MAX);
        Ok(connection.expire(key, seconds).await?)
    }
}

impl std::fmt::Debug for RedisSetStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisSetStore").finish_non_exhaustive()
    }
}
