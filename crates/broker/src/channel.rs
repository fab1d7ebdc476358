use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_core::Stream;

use crate::{BrokerError, Result};

/// Callback invoked when a connection or channel reports an asynchronous
/// error. Observers must not block.
pub type ErrorObserver = Arc<dyn Fn(&BrokerError) + Send + Sync>;

/// A stream of deliveries from one consumer.
pub type DeliveryStream = Pin<Box<dyn Stream<Item = Result<Delivery>> + Send>>;

/// Settles a single delivery with the broker.
#[async_trait]
pub trait Acker: Send + Sync {
    async fn ack(&self) -> Result<()>;

    async fn reject(&self, requeue: bool) -> Result<()>;
}

/// A message handed to a consumer, awaiting explicit settlement.
pub struct Delivery {
    pub delivery_tag: u64,
    /// Set by the broker when this delivery was handed out before and never
    /// acknowledged.
    pub redelivered: bool,
    pub body: Vec<u8>,
    acker: Box<dyn Acker>,
}

impl Delivery {
    pub fn new(delivery_tag: u64, redelivered: bool, body: Vec<u8>, acker: Box<dyn Acker>) -> Self {
        Self {
            delivery_tag,
            redelivered,
            body,
            acker,
        }
    }

    /// Acknowledges the delivery; the broker forgets it.
    pub async fn ack(&self) -> Result<()> {
        self.acker.ack().await
    }

    /// Rejects the delivery. With `requeue = false` it is discarded.
    pub async fn reject(&self, requeue: bool) -> Result<()> {
        self.acker.reject(requeue).await
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("delivery_tag", &self.delivery_tag)
            .field("redelivered", &self.redelivered)
            .field("body_len", &self.body.len())
            .finish()
    }
}

/// A broker channel: topology declaration, publishing, and consuming.
///
/// Declarations are idempotent. Implementations must be thread-safe; one
/// channel is shared by the publisher and the subscriber of a process.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Declares a durable fan-out exchange.
    async fn declare_fanout_exchange(&self, exchange: &str) -> Result<()>;

    /// Declares a durable queue.
    async fn declare_queue(&self, queue: &str) -> Result<()>;

    /// Binds `queue` to `exchange` under `routing_key`.
    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<()>;

    /// Publishes `payload` without waiting for a broker confirmation.
    async fn publish(&self, exchange: &str, routing_key: &str, payload: &[u8]) -> Result<()>;

    /// Starts consuming `queue` with explicit acknowledgement.
    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream>;

    /// Registers an observer for asynchronous channel errors.
    fn on_error(&self, observer: ErrorObserver);

    async fn close(&self) -> Result<()>;
}

/// A broker connection that owns one or more channels.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Registers an observer for asynchronous connection errors.
    fn on_error(&self, observer: ErrorObserver);

    async fn close(&self) -> Result<()>;
}

/// Opens connections to a broker.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Opens one connection and one channel on it.
    async fn connect(&self) -> Result<BrokerConnection>;
}

/// One open connection together with its channel.
#[derive(Clone)]
pub struct BrokerConnection {
    pub connection: Arc<dyn Connection>,
    pub channel: Arc<dyn Channel>,
}

impl BrokerConnection {
    pub fn new(connection: Arc<dyn Connection>, channel: Arc<dyn Channel>) -> Self {
        Self {
            connection,
            channel,
        }
    }
}

impl std::fmt::Debug for BrokerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerConnection").finish_non_exhaustive()
    }
}
