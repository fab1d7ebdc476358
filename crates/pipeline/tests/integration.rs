//! Integration tests: Publisher → in-memory fan-out broker → Subscriber → handlers.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use broker::{BrokerConnection, Channel, ConnectionManager, InMemoryBroker};
use common::ServiceId;
use message::{Decoration, Message};
use pipeline::{HandlerError, MessageHandler, Publisher, Subscriber, shutdown};

/// Keeps every message it is handed.
#[derive(Clone, Default)]
struct Capture {
    seen: Arc<Mutex<Vec<Message>>>,
}

impl Capture {
    fn seen(&self) -> Vec<Message> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageHandler for Capture {
    fn name(&self) -> &str {
        "capture"
    }

    async fn handle(&self, _channel: &Arc<dyn Channel>, message: &Message) -> Result<(), HandlerError> {
        self.seen.lock().unwrap().push(message.clone());
        Ok(())
    }
}

/// Never finishes, like a handler stuck when its process crashes.
struct Stall;

#[async_trait]
impl MessageHandler for Stall {
    fn name(&self) -> &str {
        "stall"
    }

    async fn handle(&self, _channel: &Arc<dyn Channel>, _message: &Message) -> Result<(), HandlerError> {
        std::future::pending::<()>().await;
        Ok(())
    }
}

/// Decorates every message of saga `s1` and republishes it.
struct DecorateAndForward {
    publisher: Publisher,
}

#[async_trait]
impl MessageHandler for DecorateAndForward {
    fn name(&self) -> &str {
        "decorate-and-forward"
    }

    async fn handle(&self, channel: &Arc<dyn Channel>, message: &Message) -> Result<(), HandlerError> {
        if message.saga() != "s1" || message.is_decorated_by(self.publisher.service().as_str()) {
            return Ok(());
        }
        let mut message = message.clone();
        message.decorate(
            Decoration::new(self.publisher.service()).with_field("invoiceId", "inv-1"),
        )?;
        self.publisher.publish(channel.as_ref(), &mut message).await;
        Ok(())
    }
}

async fn connect(broker: &InMemoryBroker, name: &str) -> (ConnectionManager, BrokerConnection) {
    let manager = ConnectionManager::new(Arc::new(broker.clone()), ServiceId::new(name, "1"));
    let connection = Publisher::new(manager.service().clone())
        .setup(&manager)
        .await
        .unwrap();
    (manager, connection)
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met in time");
}

#[tokio::test]
async fn test_subscriber_sees_stamped_message() {
    let broker = InMemoryBroker::new();
    let (billing, billing_conn) = connect(&broker, "billing").await;
    let capture = Capture::default();
    let handle = Subscriber::setup(
        &billing,
        Arc::clone(&billing_conn.channel),
        vec![Arc::new(capture.clone())],
    )
    .await
    .unwrap();

    let (orders, orders_conn) = connect(&broker, "orders").await;
    let mut message = Message::new("c1".into(), "s1");
    Publisher::new(orders.service().clone())
        .publish(orders_conn.channel.as_ref(), &mut message)
        .await;

    eventually(|| capture.seen().len() == 1).await;
    let seen = &capture.seen()[0];
    assert_eq!(seen.correlation_id().as_str(), "c1");
    assert_eq!(seen.last_service_decoration(), Some("orders-1"));
    assert!(seen.publish_time().is_some());
    assert!(seen.decorations().is_empty());
    assert!(seen.context().is_empty());

    handle.stop().await;
    shutdown(&billing_conn).await.unwrap();
    shutdown(&orders_conn).await.unwrap();
}

#[tokio::test]
async fn test_every_service_queue_receives_each_message() {
    let broker = InMemoryBroker::new();
    let (billing, billing_conn) = connect(&broker, "billing").await;
    let (shipping, shipping_conn) = connect(&broker, "shipping").await;
    let billing_seen = Capture::default();
    let shipping_seen = Capture::default();

    let billing_handle = Subscriber::setup(
        &billing,
        Arc::clone(&billing_conn.channel),
        vec![Arc::new(billing_seen.clone())],
    )
    .await
    .unwrap();
    let shipping_handle = Subscriber::setup(
        &shipping,
        Arc::clone(&shipping_conn.channel),
        vec![Arc::new(shipping_seen.clone())],
    )
    .await
    .unwrap();

    let mut message = Message::builder("s1").context("orderId", "o-1").build();
    Publisher::new(ServiceId::new("orders", "1"))
        .publish(billing_conn.channel.as_ref(), &mut message)
        .await;

    eventually(|| billing_seen.seen().len() == 1 && shipping_seen.seen().len() == 1).await;
    assert_eq!(billing_seen.seen()[0], shipping_seen.seen()[0]);

    billing_handle.stop().await;
    shipping_handle.stop().await;
}

#[tokio::test]
async fn test_instances_of_one_service_share_the_queue() {
    let broker = InMemoryBroker::new();
    let (first, first_conn) = connect(&broker, "billing").await;
    let (second, second_conn) = connect(&broker, "billing").await;
    let first_seen = Capture::default();
    let second_seen = Capture::default();

    let first_handle = Subscriber::setup(
        &first,
        Arc::clone(&first_conn.channel),
        vec![Arc::new(first_seen.clone())],
    )
    .await
    .unwrap();
    let second_handle = Subscriber::setup(
        &second,
        Arc::clone(&second_conn.channel),
        vec![Arc::new(second_seen.clone())],
    )
    .await
    .unwrap();

    let publisher = Publisher::new(ServiceId::new("orders", "1"));
    for id in ["c1", "c2"] {
        let mut message = Message::new(id.into(), "s1");
        publisher.publish(first_conn.channel.as_ref(), &mut message).await;
    }

    eventually(|| first_seen.seen().len() + second_seen.seen().len() == 2).await;
    assert_eq!(first_seen.seen().len(), 1);
    assert_eq!(second_seen.seen().len(), 1);

    first_handle.stop().await;
    second_handle.stop().await;
}

#[tokio::test]
async fn test_decorated_republish_reaches_downstream_service() {
    let broker = InMemoryBroker::new();
    let (billing, billing_conn) = connect(&broker, "billing").await;
    let (shipping, shipping_conn) = connect(&broker, "shipping").await;
    let shipping_seen = Capture::default();

    let billing_handle = Subscriber::setup(
        &billing,
        Arc::clone(&billing_conn.channel),
        vec![Arc::new(DecorateAndForward {
            publisher: Publisher::new(billing.service().clone()),
        })],
    )
    .await
    .unwrap();
    let shipping_handle = Subscriber::setup(
        &shipping,
        Arc::clone(&shipping_conn.channel),
        vec![Arc::new(shipping_seen.clone())],
    )
    .await
    .unwrap();

    let mut message = Message::new("c9".into(), "s1");
    Publisher::new(ServiceId::new("orders", "1"))
        .publish(shipping_conn.channel.as_ref(), &mut message)
        .await;

    eventually(|| shipping_seen.seen().len() == 2).await;
    let forwarded = shipping_seen
        .seen()
        .into_iter()
        .find(|m| m.is_decorated_by("billing-1"))
        .unwrap();
    assert_eq!(forwarded.last_service_decoration(), Some("billing-1"));
    assert_eq!(forwarded.publish_time(), message.publish_time());
    assert_eq!(
        forwarded.decorations()[0].field("invoiceId"),
        Some(&serde_json::json!("inv-1"))
    );

    billing_handle.stop().await;
    shipping_handle.stop().await;
}

#[tokio::test]
async fn test_unacknowledged_message_is_redelivered_after_crash() {
    let broker = InMemoryBroker::new();
    let (billing, crashed_conn) = connect(&broker, "billing").await;
    let crashed = Subscriber::setup(
        &billing,
        Arc::clone(&crashed_conn.channel),
        vec![Arc::new(Stall)],
    )
    .await
    .unwrap();

    let mut message = Message::new("c1".into(), "s1");
    Publisher::new(ServiceId::new("orders", "1"))
        .publish(crashed_conn.channel.as_ref(), &mut message)
        .await;
    eventually(|| broker.unacked_count("billing-1") == 1).await;

    crashed.abort();
    shutdown(&crashed_conn).await.unwrap();
    assert_eq!(broker.ready_count("billing-1"), 1);

    let (billing, recovered_conn) = connect(&broker, "billing").await;
    let capture = Capture::default();
    let recovered = Subscriber::setup(
        &billing,
        Arc::clone(&recovered_conn.channel),
        vec![Arc::new(capture.clone())],
    )
    .await
    .unwrap();

    eventually(|| capture.seen().len() == 1).await;
    assert_eq!(capture.seen()[0].correlation_id().as_str(), "c1");
    eventually(|| broker.unacked_count("billing-1") == 0).await;

    recovered.stop().await;
}
