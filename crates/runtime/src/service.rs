//! Lifecycle of one service process on the bus.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use broker::{BrokerConnection, Channel, ConnectionManager, Connector, FANOUT_EXCHANGE};
use common::ServiceId;
use message::Message;
use pipeline::{MessageHandler, Publisher, RetryPolicy, Subscriber, SubscriberHandle};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::Instrument;

use crate::Result;

/// A message published when the service starts and then again on every
/// `interval`.
#[derive(Debug, Clone)]
pub struct StartupMessage {
    pub message: Message,
    pub interval: Duration,
}

impl StartupMessage {
    pub fn new(message: Message, interval: Duration) -> Self {
        Self { message, interval }
    }
}

/// Configures and starts a [`ServiceRuntime`].
pub struct ServiceRuntimeBuilder {
    service: ServiceId,
    connector: Arc<dyn Connector>,
    retry: RetryPolicy,
    handlers: Vec<Arc<dyn MessageHandler>>,
    startup_messages: Vec<StartupMessage>,
}

impl ServiceRuntimeBuilder {
    /// Sets the bounds for connecting to the broker.
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Registers a message handler. Handlers run in registration order.
    pub fn handler(mut self, handler: Arc<dyn MessageHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn startup_message(mut self, startup: StartupMessage) -> Self {
        self.startup_messages.push(startup);
        self
    }

    /// Connects, starts the subscriber and publishes startup messages.
    ///
    /// Any failure here is fatal to the service. A service without handlers
    /// only publishes and consumes nothing.
    #[tracing::instrument(skip_all, fields(service = %self.service))]
    pub async fn start(self) -> Result<ServiceRuntime> {
        let manager = ConnectionManager::new(self.connector, self.service.clone());
        let publisher = Publisher::new(self.service.clone()).with_retry(self.retry);

        let connection = publisher.setup(&manager).await?;
        // Publish-only services never bind a queue, so declare the exchange
        // they publish to here.
        connection
            .channel
            .declare_fanout_exchange(FANOUT_EXCHANGE)
            .await?;

        let subscriber = if self.handlers.is_empty() {
            tracing::info!("no handlers registered, not subscribing");
            None
        } else {
            Some(Subscriber::setup(&manager, Arc::clone(&connection.channel), self.handlers).await?)
        };

        if self.startup_messages.is_empty() {
            tracing::info!("no startup messages to publish");
        }
        let mut timers = Vec::with_capacity(self.startup_messages.len());
        for startup in self.startup_messages {
            let mut message = startup.message.clone();
            publisher
                .publish(connection.channel.as_ref(), &mut message)
                .await;
            tracing::info!(saga = message.saga(), "published startup message");
            timers.push(spawn_republish(
                publisher.clone(),
                Arc::clone(&connection.channel),
                startup,
            ));
        }

        tracing::info!("service started");
        Ok(ServiceRuntime {
            service: self.service,
            publisher,
            connection,
            subscriber,
            timers,
        })
    }
}

/// Republishes a fresh copy of the startup message on every tick.
fn spawn_republish(
    publisher: Publisher,
    channel: Arc<dyn Channel>,
    startup: StartupMessage,
) -> JoinHandle<()> {
    let span = tracing::info_span!("startup_message", saga = startup.message.saga());
    tokio::spawn(
        async move {
            let start = tokio::time::Instant::now() + startup.interval;
            let mut ticks = tokio::time::interval_at(start, startup.interval);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                let mut message = startup.message.clone();
                publisher.publish(channel.as_ref(), &mut message).await;
                tracing::info!("re-published startup message");
            }
        }
        .instrument(span),
    )
}

/// A running service: its broker connection, subscriber and startup timers.
///
/// There is exactly one broker channel per runtime, shared by publishing and
/// consuming.
pub struct ServiceRuntime {
    service: ServiceId,
    publisher: Publisher,
    connection: BrokerConnection,
    subscriber: Option<SubscriberHandle>,
    timers: Vec<JoinHandle<()>>,
}

impl ServiceRuntime {
    pub fn builder(service: ServiceId, connector: Arc<dyn Connector>) -> ServiceRuntimeBuilder {
        ServiceRuntimeBuilder {
            service,
            connector,
            retry: RetryPolicy::default(),
            handlers: Vec::new(),
            startup_messages: Vec::new(),
        }
    }

    pub fn service(&self) -> &ServiceId {
        &self.service
    }

    /// Returns the shared broker channel.
    pub fn channel(&self) -> &Arc<dyn Channel> {
        &self.connection.channel
    }

    /// Publishes `message` on the shared channel. See [`Publisher::publish`].
    pub async fn publish(&self, message: &mut Message) {
        self.publisher
            .publish(self.connection.channel.as_ref(), message)
            .await;
    }

    /// Stops startup timers and the subscriber, then closes the broker
    /// channel and connection.
    ///
    /// Every step runs even if an earlier one fails; failures are logged and
    /// the first one is returned.
    #[tracing::instrument(skip_all, fields(service = %self.service))]
    pub async fn shutdown(self) -> Result<()> {
        tracing::info!("graceful shutdown initiated");
        for timer in &self.timers {
            timer.abort();
        }
        if let Some(subscriber) = self.subscriber {
            subscriber.stop().await;
        }
        pipeline::shutdown(&self.connection).await?;
        tracing::info!("shutdown complete");
        Ok(())
    }

    /// Runs until `signal` completes, then shuts down.
    pub async fn run_until(self, signal: impl Future<Output = ()>) -> Result<()> {
        signal.await;
        self.shutdown().await
    }
}

impl std::fmt::Debug for ServiceRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRuntime")
            .field("service", &self.service)
            .field("subscribed", &self.subscriber.is_some())
            .field("timers", &self.timers.len())
            .finish_non_exhaustive()
    }
}
