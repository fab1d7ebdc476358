//! RabbitMQ integration tests
//!
//! These tests share one RabbitMQ container and need Docker. Run with:
//!
//! ```bash
//! cargo test -p broker --test amqp_integration -- --ignored --test-threads=1
//! ```

use std::sync::Arc;
use std::time::Duration;

use broker::{AmqpConnector, ConnectionManager, FANOUT_EXCHANGE, ROUTING_KEY};
use common::ServiceId;
use futures_util::StreamExt;
use serial_test::serial;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::rabbitmq::RabbitMq;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<RabbitMq>,
    uri: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = RabbitMq::default().start().await.unwrap();
            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5672).await.unwrap();
            let uri = format!("amqp://guest:guest@{host}:{port}/%2f");
            Arc::new(ContainerInfo { container, uri })
        })
        .await
        .clone()
}

async fn manager_for(service: &str) -> ConnectionManager {
    let info = get_container_info().await;
    ConnectionManager::new(
        Arc::new(AmqpConnector::new(info.uri.clone())),
        ServiceId::new(service, "1"),
    )
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn topology_declaration_is_idempotent() {
    let manager = manager_for("idempotent").await;
    let connection = manager
        .retry_connect(5, Duration::from_millis(500))
        .await
        .unwrap();

    manager
        .create_and_bind_queue(connection.channel.as_ref())
        .await
        .unwrap();
    manager
        .create_and_bind_queue(connection.channel.as_ref())
        .await
        .unwrap();

    connection.channel.close().await.unwrap();
    connection.connection.close().await.unwrap();
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn fanout_reaches_every_bound_queue() {
    let first = manager_for("fanout-a").await;
    let second = manager_for("fanout-b").await;
    let conn_a = first.retry_connect(5, Duration::from_millis(500)).await.unwrap();
    let conn_b = second.retry_connect(5, Duration::from_millis(500)).await.unwrap();
    first
        .create_and_bind_queue(conn_a.channel.as_ref())
        .await
        .unwrap();
    second
        .create_and_bind_queue(conn_b.channel.as_ref())
        .await
        .unwrap();

    conn_a
        .channel
        .publish(FANOUT_EXCHANGE, ROUTING_KEY, br#"{"probe":1}"#)
        .await
        .unwrap();

    for (manager, connection) in [(&first, &conn_a), (&second, &conn_b)] {
        let mut stream = connection
            .channel
            .consume(manager.queue_name(), "test")
            .await
            .unwrap();
        let delivery = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(delivery.body, br#"{"probe":1}"#);
        delivery.ack().await.unwrap();
    }

    conn_a.connection.close().await.unwrap();
    conn_b.connection.close().await.unwrap();
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn unacked_delivery_is_redelivered_after_connection_loss() {
    let manager = manager_for("redelivery").await;
    let first = manager.retry_connect(5, Duration::from_millis(500)).await.unwrap();
    manager
        .create_and_bind_queue(first.channel.as_ref())
        .await
        .unwrap();
    first
        .channel
        .publish(FANOUT_EXCHANGE, ROUTING_KEY, b"{}")
        .await
        .unwrap();

    let mut stream = first
        .channel
        .consume(manager.queue_name(), "crashy")
        .await
        .unwrap();
    let delivery = tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(!delivery.redelivered);
    first.connection.close().await.unwrap();

    let second = manager.retry_connect(5, Duration::from_millis(500)).await.unwrap();
    let mut stream = second
        .channel
        .consume(manager.queue_name(), "recovered")
        .await
        .unwrap();
    let delivery = tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(delivery.redelivered);
    delivery.ack().await.unwrap();
    second.connection.close().await.unwrap();
}
