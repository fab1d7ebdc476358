//! Broker connection management and fan-out topology.

use std::sync::Arc;
use std::time::Duration;

use common::ServiceId;

use crate::channel::{BrokerConnection, Channel, Connector};
use crate::instrument::InstrumentedChannel;
use crate::{BrokerError, Result};

/// The single fan-out exchange every service publishes to.
pub const FANOUT_EXCHANGE: &str = "fanoutExchange";

/// Fan-out ignores routing keys; bindings and publishes use the empty key.
pub const ROUTING_KEY: &str = "";

/// Opens broker connections for one service and declares its topology.
///
/// Holds no mutable state between calls, so `connect` and `retry_connect`
/// may be called any number of times.
#[derive(Clone)]
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    service: ServiceId,
}

impl ConnectionManager {
    /// Creates a connection manager for `service`.
    pub fn new(connector: Arc<dyn Connector>, service: ServiceId) -> Self {
        Self { connector, service }
    }

    pub fn service(&self) -> &ServiceId {
        &self.service
    }

    /// Returns the durable queue shared by all instances of this service.
    pub fn queue_name(&self) -> &str {
        self.service.as_str()
    }

    /// Opens one connection and one channel.
    ///
    /// Error observers on both only log: a failing channel degrades silently
    /// and the failure surfaces on the next operation that uses it.
    pub async fn connect(&self) -> Result<BrokerConnection> {
        metrics::counter!("broker_connect_attempts_total").increment(1);
        let opened = self.connector.connect().await.inspect_err(|e| {
            tracing::error!(error = %e, "failed to connect to broker");
        })?;

        opened.connection.on_error(Arc::new(|e: &BrokerError| {
            tracing::error!(error = %e, "error from broker connection");
        }));
        opened.channel.on_error(Arc::new(|e: &BrokerError| {
            metrics::counter!("broker_channel_errors_total").increment(1);
            tracing::error!(error = %e, "error from broker channel");
        }));

        let channel: Arc<dyn Channel> = Arc::new(InstrumentedChannel::new(opened.channel));
        Ok(BrokerConnection::new(opened.connection, channel))
    }

    /// Connects with exponential backoff.
    ///
    /// Makes up to `max_retries` attempts (at least one). After each failure
    /// waits `delay` and then doubles it; there is no jitter. Runs on the
    /// calling task until it succeeds or gives up.
    #[tracing::instrument(skip(self), fields(service = %self.service))]
    pub async fn retry_connect(
        &self,
        max_retries: u32,
        initial_delay: Duration,
    ) -> Result<BrokerConnection> {
        let attempts = max_retries.max(1);
        let mut delay = initial_delay;
        let mut last_error = None;

        for attempt in 1..=attempts {
            match self.connect().await {
                Ok(connection) => {
                    tracing::info!(attempt, "connected to broker");
                    return Ok(connection);
                }
                Err(e) => {
                    last_error = Some(e);
                    if attempt < attempts {
                        tracing::warn!(
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            "broker connection failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        delay = delay.saturating_mul(2);
                    }
                }
            }
        }

        let last_error = last_error.map(|e| e.to_string()).unwrap_or_default();
        tracing::error!(attempts, %last_error, "giving up on broker connection");
        Err(BrokerError::ConnectionExhausted {
            attempts,
            last_error,
        })
    }

    /// Declares the fan-out exchange and this service's durable queue, and
    /// binds them so the queue receives every published message.
    pub async fn create_and_bind_queue(&self, channel: &dyn Channel) -> Result<()> {
        let queue = self.queue_name();
        tracing::info!(queue, "declaring queue");

        let declared = async {
            channel.declare_fanout_exchange(FANOUT_EXCHANGE).await?;
            channel.declare_queue(queue).await?;
            channel.bind_queue(queue, FANOUT_EXCHANGE, ROUTING_KEY).await
        };
        declared.await.inspect_err(|e| {
            tracing::error!(queue, error = %e, "failed to declare broker topology");
        })?;

        tracing::info!(queue, exchange = FANOUT_EXCHANGE, "queue created and bound");
        Ok(())
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("service", &self.service)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryBroker;
    use tokio::time::Instant;

    fn manager(broker: &InMemoryBroker) -> ConnectionManager {
        ConnectionManager::new(Arc::new(broker.clone()), ServiceId::new("billing", "1"))
    }

    #[tokio::test]
    async fn test_connect_opens_connection_and_channel() {
        let broker = InMemoryBroker::new();
        let connection = manager(&broker).connect().await.unwrap();

        connection.channel.declare_queue("probe").await.unwrap();
        assert!(broker.has_queue("probe"));
    }

    #[tokio::test]
    async fn test_connect_survives_channel_errors() {
        let broker = InMemoryBroker::new();
        let connection = manager(&broker).connect().await.unwrap();

        broker.report_connection_error("heartbeat missed");
        broker.break_channels("PRECONDITION_FAILED");

        let result = connection.channel.declare_queue("probe").await;
        assert!(matches!(result, Err(BrokerError::Channel(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_connect_backs_off_exponentially() {
        let broker = InMemoryBroker::new();
        broker.fail_next_connects(2);

        let start = Instant::now();
        let result = manager(&broker)
            .retry_connect(3, Duration::from_millis(100))
            .await;

        assert!(result.is_ok());
        assert_eq!(broker.connect_attempts(), 3);
        // 100ms after the first failure, 200ms after the second.
        assert!(start.elapsed() >= Duration::from_millis(300));
        assert!(start.elapsed() < Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_connect_exhausts() {
        let broker = InMemoryBroker::new();
        broker.fail_next_connects(10);

        let start = Instant::now();
        let result = manager(&broker)
            .retry_connect(3, Duration::from_millis(50))
            .await;

        match result {
            Err(BrokerError::ConnectionExhausted {
                attempts,
                last_error,
            }) => {
                assert_eq!(attempts, 3);
                assert!(last_error.contains("connection refused"));
            }
            other => panic!("expected ConnectionExhausted, got {other:?}"),
        }
        assert_eq!(broker.connect_attempts(), 3);
        // No sleep after the final attempt.
        assert!(start.elapsed() >= Duration::from_millis(150));
        assert!(start.elapsed() < Duration::from_millis(350));
    }

    #[tokio::test]
    async fn test_retry_connect_makes_at_least_one_attempt() {
        let broker = InMemoryBroker::new();
        let result = manager(&broker).retry_connect(0, Duration::ZERO).await;
        assert!(result.is_ok());
        assert_eq!(broker.connect_attempts(), 1);
    }

    #[tokio::test]
    async fn test_retry_connect_holds_no_state_between_calls() {
        let broker = InMemoryBroker::new();
        let manager = manager(&broker);

        broker.fail_next_connects(1);
        assert!(manager.retry_connect(1, Duration::ZERO).await.is_err());
        assert!(manager.retry_connect(1, Duration::ZERO).await.is_ok());
    }

    #[tokio::test]
    async fn test_create_and_bind_queue_declares_fanout_topology() {
        let broker = InMemoryBroker::new();
        let manager = manager(&broker);
        let connection = manager.connect().await.unwrap();

        manager
            .create_and_bind_queue(connection.channel.as_ref())
            .await
            .unwrap();
        manager
            .create_and_bind_queue(connection.channel.as_ref())
            .await
            .unwrap();

        assert!(broker.has_exchange(FANOUT_EXCHANGE));
        assert!(broker.has_queue("billing-1"));
        assert_eq!(broker.bindings(FANOUT_EXCHANGE), vec!["billing-1".to_string()]);
    }
}
