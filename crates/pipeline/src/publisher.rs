//! Stamping and emitting messages onto the fan-out exchange.

use std::time::Duration;

use broker::{BrokerConnection, Channel, ConnectionManager, FANOUT_EXCHANGE, ROUTING_KEY};
use chrono::Utc;
use common::{ServiceId, format_error};
use message::Message;

use crate::Result;

/// Bounds for connecting the publisher at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total connection attempts, at least one.
    pub max_retries: u32,
    /// Wait after the first failure; doubled after every further failure.
    pub initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_secs(1),
        }
    }
}

/// Publishes saga messages on behalf of one service.
#[derive(Debug, Clone)]
pub struct Publisher {
    service: ServiceId,
    retry: RetryPolicy,
}

impl Publisher {
    /// Creates a publisher for `service` with the default retry policy.
    pub fn new(service: ServiceId) -> Self {
        Self {
            service,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn service(&self) -> &ServiceId {
        &self.service
    }

    /// Connects to the broker, retrying with backoff.
    ///
    /// The returned channel is the process's single publish channel; the
    /// subscriber reuses it.
    #[tracing::instrument(skip(self, manager), fields(service = %self.service))]
    pub async fn setup(&self, manager: &ConnectionManager) -> Result<BrokerConnection> {
        let connection = manager
            .retry_connect(self.retry.max_retries, self.retry.initial_delay)
            .await?;
        tracing::info!("publisher channel ready");
        Ok(connection)
    }

    /// Stamps `message` as emitted by this service and publishes it.
    ///
    /// Fire-and-forget: no broker confirmation is awaited, and a serialization
    /// or publish failure is logged and dropped rather than returned.
    #[tracing::instrument(
        skip_all,
        fields(correlation_id = %message.correlation_id(), saga = message.saga())
    )]
    pub async fn publish(&self, channel: &dyn Channel, message: &mut Message) {
        message.stamp_publication(&self.service, Utc::now());

        let payload = match message.to_vec() {
            Ok(payload) => payload,
            Err(e) => {
                metrics::counter!("broker_publish_failures_total").increment(1);
                tracing::error!(error = %format_error(&e), "failed to serialize message");
                return;
            }
        };

        match channel.publish(FANOUT_EXCHANGE, ROUTING_KEY, &payload).await {
            Ok(()) => {
                metrics::counter!("broker_publish_total").increment(1);
                tracing::debug!(exchange = FANOUT_EXCHANGE, "published message");
            }
            Err(e) => {
                metrics::counter!("broker_publish_failures_total").increment(1);
                tracing::error!(error = %format_error(&e), "failed to publish message");
            }
        }
    }
}
