//! Tracing and metrics applied once at the channel boundary.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use crate::channel::{Channel, DeliveryStream, ErrorObserver};
use crate::Result;

/// Wraps a channel so every operation is traced and counted in one place.
///
/// [`ConnectionManager::connect`](crate::ConnectionManager::connect) applies
/// it to every channel it hands out.
pub struct InstrumentedChannel {
    inner: Arc<dyn Channel>,
}

impl InstrumentedChannel {
    pub fn new(inner: Arc<dyn Channel>) -> Self {
        Self { inner }
    }

    fn record(operation: &'static str, result: &Result<()>) {
        metrics::counter!("broker_operations_total", "operation" => operation).increment(1);
        if let Err(e) = result {
            metrics::counter!("broker_operation_failures_total", "operation" => operation)
                .increment(1);
            tracing::debug!(operation, error = %e, "broker operation failed");
        }
    }
}

#[async_trait]
impl Channel for InstrumentedChannel {
    async fn declare_fanout_exchange(&self, exchange: &str) -> Result<()> {
        let result = self.inner.declare_fanout_exchange(exchange).await;
        Self::record("declare_exchange", &result);
        result
    }

    async fn declare_queue(&self, queue: &str) -> Result<()> {
        let result = self.inner.declare_queue(queue).await;
        Self::record("declare_queue", &result);
        result
    }

    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<()> {
        let result = self.inner.bind_queue(queue, exchange, routing_key).await;
        Self::record("bind_queue", &result);
        result
    }

    #[tracing::instrument(skip(self, payload), fields(bytes = payload.len()))]
    async fn publish(&self, exchange: &str, routing_key: &str, payload: &[u8]) -> Result<()> {
        let start = Instant::now();
        let result = self.inner.publish(exchange, routing_key, payload).await;
        metrics::histogram!("broker_publish_duration_seconds")
            .record(start.elapsed().as_secs_f64());
        Self::record("publish", &result);
        result
    }

    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream> {
        let result = self.inner.consume(queue, consumer_tag).await;
        let outcome = result.as_ref().map(|_| ()).map_err(Clone::clone);
        Self::record("consume", &outcome);
        result
    }

    fn on_error(&self, observer: ErrorObserver) {
        self.inner.on_error(observer);
    }

    async fn close(&self) -> Result<()> {
        let result = self.inner.close().await;
        Self::record("close", &result);
        result
    }
}
