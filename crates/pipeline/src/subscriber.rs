//! Consuming the service queue and dispatching to handlers.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use broker::{Channel, ConnectionManager, Delivery, DeliveryStream};
use common::format_error;
use futures_util::{FutureExt, StreamExt};
use message::Message;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::Result;
use crate::handler::{Instrumented, MessageHandler};

type Handlers = Vec<Instrumented<Arc<dyn MessageHandler>>>;

/// Sets up consumption of a service's queue.
pub struct Subscriber;

impl Subscriber {
    /// Ensures the queue topology on `channel`, starts consuming with explicit
    /// acknowledgement and returns a handle owning the consume task.
    ///
    /// `handlers` run in the given order for every message. `channel` is the
    /// shared publish channel; it is also what handlers receive.
    #[tracing::instrument(skip_all, fields(queue = manager.queue_name(), handlers = handlers.len()))]
    pub async fn setup(
        manager: &ConnectionManager,
        channel: Arc<dyn Channel>,
        handlers: Vec<Arc<dyn MessageHandler>>,
    ) -> Result<SubscriberHandle> {
        manager.create_and_bind_queue(channel.as_ref()).await?;

        let queue = manager.queue_name().to_string();
        // An empty consumer tag lets the broker generate one.
        let deliveries = channel.consume(&queue, "").await?;
        let handlers: Handlers = handlers.into_iter().map(Instrumented::new).collect();

        let (stop_tx, stop_rx) = watch::channel(false);
        let span = tracing::info_span!("subscriber", queue = %queue);
        let task = tokio::spawn(consume(deliveries, channel, handlers, stop_rx).instrument(span));

        tracing::info!("subscriber started");
        Ok(SubscriberHandle {
            queue,
            stop: stop_tx,
            task,
        })
    }
}

/// Owns a running consume task.
///
/// Dropping the handle also stops consumption after the message in progress.
#[derive(Debug)]
pub struct SubscriberHandle {
    queue: String,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SubscriberHandle {
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Returns true once the consume task has ended.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stops consuming once the message in progress is settled, then waits
    /// for the consume task to end.
    pub async fn stop(self) {
        // Fails only if the task already ended.
        let _ = self.stop.send(true);
        if let Err(e) = self.task.await {
            tracing::error!(queue = %self.queue, error = %e, "subscriber task failed");
        }
    }

    /// Cancels the consume task immediately. An unsettled delivery stays
    /// unacknowledged and is redelivered once its channel closes.
    pub fn abort(&self) {
        self.task.abort();
    }
}

async fn consume(
    mut deliveries: DeliveryStream,
    channel: Arc<dyn Channel>,
    handlers: Handlers,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        let next = tokio::select! {
            biased;
            _ = stop.changed() => {
                tracing::info!("subscriber stopping");
                break;
            }
            next = deliveries.next() => next,
        };

        match next {
            Some(Ok(delivery)) => process_delivery(&channel, &handlers, delivery).await,
            Some(Err(e)) => {
                tracing::error!(error = %format_error(&e), "consumer failed");
                break;
            }
            None => {
                tracing::info!("consumer cancelled by broker");
                break;
            }
        }
    }
}

/// Parses one delivery, runs every handler on it and settles it exactly once.
#[tracing::instrument(
    skip_all,
    fields(delivery_tag = delivery.delivery_tag, redelivered = delivery.redelivered)
)]
async fn process_delivery(channel: &Arc<dyn Channel>, handlers: &Handlers, delivery: Delivery) {
    metrics::counter!("pipeline_messages_received_total").increment(1);

    let message = match Message::from_slice(&delivery.body) {
        Ok(message) => message,
        Err(e) => {
            metrics::counter!("pipeline_messages_rejected_total").increment(1);
            tracing::warn!(error = %format_error(&e), "rejecting unparseable message");
            if let Err(e) = delivery.reject(false).await {
                tracing::error!(error = %format_error(&e), "failed to reject message");
            }
            return;
        }
    };

    tracing::debug!(
        correlation_id = %message.correlation_id(),
        saga = message.saga(),
        "received message"
    );

    for handler in handlers {
        match AssertUnwindSafe(handler.handle(channel, &message))
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(
                handler = handler.name(),
                correlation_id = %message.correlation_id(),
                error = %format_error(&e),
                "message handler failed"
            ),
            Err(panic) => {
                let name = handler.name().to_string();
                metrics::counter!("pipeline_handler_failures_total", "handler" => name).increment(1);
                tracing::error!(
                    handler = handler.name(),
                    correlation_id = %message.correlation_id(),
                    panic = panic_message(panic.as_ref()),
                    "message handler panicked"
                );
            }
        }
    }

    match delivery.ack().await {
        Ok(()) => tracing::debug!(correlation_id = %message.correlation_id(), "acknowledged message"),
        Err(e) => tracing::error!(
            correlation_id = %message.correlation_id(),
            error = %format_error(&e),
            "failed to acknowledge message"
        ),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
