//! Redis integration tests
//!
//! These tests share one Redis container and need Docker. Run with:
//!
//! ```bash
//! cargo test -p dedup --test redis_integration -- --ignored --test-threads=1
//! ```

use std::sync::Arc;

use common::{CorrelationId, ServiceId};
use dedup::{DedupCache, PROCESSED_MESSAGE_TTL, RedisSetStore, SetStore};
use serial_test::serial;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::redis::Redis;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Redis>,
    url: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Redis::default().start().await.unwrap();
            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(6379).await.unwrap();
            let url = format!("redis://{host}:{port}");
            Arc::new(ContainerInfo { container, url })
        })
        .await
        .clone()
}

async fn store() -> RedisSetStore {
    let info = get_container_info().await;
    RedisSetStore::connect(&info.url).await.unwrap()
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn set_membership_round_trips_through_redis() {
    let store = store().await;

    assert!(store.add_member("it:members", "a").await.unwrap());
    assert!(!store.add_member("it:members", "a").await.unwrap());
    assert!(store.is_member("it:members", "a").await.unwrap());
    assert!(!store.is_member("it:members", "b").await.unwrap());
    assert!(!store.expire("it:missing", 10).await.unwrap());
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn cache_records_processed_messages_with_ttl() {
    let store = store().await;
    let cache = DedupCache::new(Arc::new(store), &ServiceId::new("it-billing", "1"));
    let id = CorrelationId::new();

    assert!(!cache.has_processed_message(&id).await.unwrap());
    cache.add_processed_message(&id).await.unwrap();
    cache.add_processed_message(&id).await.unwrap();
    assert!(cache.has_processed_message(&id).await.unwrap());

    let info = get_container_info().await;
    let client = redis::Client::open(info.url.as_str()).unwrap();
    let mut conn = client.get_multiplexed_async_connection().await.unwrap();
    let ttl: i64 = redis::cmd("TTL")
        .arg(cache.key())
        .query_async(&mut conn)
        .await
        .unwrap();
    assert!(ttl > 0);
    assert!(ttl as u64 <= PROCESSED_MESSAGE_TTL.as_secs());
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn caches_of_different_services_do_not_share_entries() {
    let billing = DedupCache::new(Arc::new(store().await), &ServiceId::new("it-billing", "2"));
    let shipping = DedupCache::new(Arc::new(store().await), &ServiceId::new("it-shipping", "2"));
    let id = CorrelationId::new();

    billing.add_processed_message(&id).await.unwrap();

    assert!(billing.has_processed_message(&id).await.unwrap());
    assert!(!shipping.has_processed_message(&id).await.unwrap());
}
