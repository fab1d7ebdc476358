use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::store::SetStore;
use crate::{CacheError, Result};

#[derive(Debug, Default)]
struct SetEntry {
    members: HashSet<String>,
    expires_at: Option<Instant>,
}

impl SetEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug, Default)]
struct InMemorySetState {
    sets: HashMap<String, SetEntry>,
    unavailable: bool,
    calls: usize,
}

impl InMemorySetState {
    fn begin_call(&mut self) -> Result<()> {
        self.calls += 1;
        if self.unavailable {
            return Err(CacheError::Store("store unavailable".to_string()));
        }
        let now = Instant::now();
        self.sets.retain(|_, entry| !entry.is_expired(now));
        Ok(())
    }
}

/// In-memory set store for testing.
///
/// Honors expiry against the tokio clock, so tests running with paused time
/// can observe TTL behavior.
#[derive(Debug, Clone, Default)]
pub struct InMemorySetStore {
    state: Arc<RwLock<InMemorySetState>>,
}

impl InMemorySetStore {
    /// Creates a new empty set store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures every call to fail as if the store were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.write().unwrap_or_else(PoisonError::into_inner).unavailable = unavailable;
    }

    /// Returns the number of store calls made so far.
    pub fn call_count(&self) -> usize {
        self.state.read().unwrap_or_else(PoisonError::into_inner).calls
    }

    /// Returns the remaining time-to-live of `key`, if it has one.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        state
            .sets
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .and_then(|entry| entry.expires_at)
            .map(|at| at.saturating_duration_since(now))
    }

    /// Returns the number of live members of the set at `key`.
    pub fn member_count(&self, key: &str) -> usize {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state
            .sets
            .get(key)
            .filter(|entry| !entry.is_expired(Instant::now()))
            .map(|entry| entry.members.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl SetStore for InMemorySetStore {
    async fn add_member(&self, key: &str, member: &str) -> Result<bool> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.begin_call()?;
        Ok(state
            .sets
            .entry(key.to_string())
            .or_default()
            .members
            .insert(member.to_string()))
    }

    async fn is_member(&self, key: &str, member: &str) -> Result<bool> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.begin_call()?;
        Ok(state
            .sets
            .get(key)
            .is_some_and(|entry| entry.members.contains(member)))
    }

    async fn expire(&self, key: &str, seconds: u64) -> Result<bool> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.begin_call()?;
        match state.sets.get_mut(key) {
            Some(entry) => {
                entry.expires_at = Some(Instant::now() + Duration::from_secs(seconds));
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_add_and_check_membership() {
        let store = InMemorySetStore::new();
        assert!(store.add_member("k", "a").await.unwrap());
        assert!(!store.add_member("k", "a").await.unwrap());
        assert!(store.is_member("k", "a").await.unwrap());
        assert!(!store.is_member("k", "b").await.unwrap());
        assert!(!store.is_member("other", "a").await.unwrap());
        assert_eq!(store.member_count("k"), 1);
    }

    #[tokio::test]
    async fn test_expire_missing_key_returns_false() {
        let store = InMemorySetStore::new();
        assert!(!store.expire("missing", 10).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_disappears_after_ttl() {
        let store = InMemorySetStore::new();
        store.add_member("k", "a").await.unwrap();
        store.expire("k", 60).await.unwrap();

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(store.is_member("k", "a").await.unwrap());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(!store.is_member("k", "a").await.unwrap());
        assert_eq!(store.member_count("k"), 0);
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_every_call() {
        let store = InMemorySetStore::new();
        store.set_unavailable(true);
        assert!(store.add_member("k", "a").await.is_err());
        assert!(store.is_member("k", "a").await.is_err());
        assert!(store.expire("k", 1).await.is_err());
        assert_eq!(store.call_count(), 3);
    }
}
