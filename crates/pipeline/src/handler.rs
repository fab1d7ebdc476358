//! The message handler capability and its instrumentation middleware.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use broker::Channel;
use message::Message;
use tracing::Instrument;

use crate::HandlerError;

/// Something a subscriber invokes for every message it receives.
///
/// Handlers get the shared publish channel so they can republish the message
/// after decorating it.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Returns the handler's name, used in logs and metric labels.
    fn name(&self) -> &str;

    /// Handles one message.
    async fn handle(&self, channel: &Arc<dyn Channel>, message: &Message)
    -> Result<(), HandlerError>;
}

#[async_trait]
impl<H: MessageHandler + ?Sized> MessageHandler for Arc<H> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn handle(
        &self,
        channel: &Arc<dyn Channel>,
        message: &Message,
    ) -> Result<(), HandlerError> {
        (**self).handle(channel, message).await
    }
}

/// Traces, times and counts every call to the wrapped handler.
///
/// The subscriber wraps each registered handler in one of these, so handlers
/// never instrument themselves.
pub struct Instrumented<H> {
    inner: H,
}

impl<H: MessageHandler> Instrumented<H> {
    pub fn new(inner: H) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<H: MessageHandler> MessageHandler for Instrumented<H> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn handle(
        &self,
        channel: &Arc<dyn Channel>,
        message: &Message,
    ) -> Result<(), HandlerError> {
        let handler = self.inner.name().to_string();
        let span = tracing::info_span!(
            "handle_message",
            handler = %handler,
            correlation_id = %message.correlation_id(),
            saga = message.saga(),
        );

        let start = Instant::now();
        let result = self.inner.handle(channel, message).instrument(span).await;
        metrics::histogram!("pipeline_handler_duration_seconds", "handler" => handler.clone())
            .record(start.elapsed().as_secs_f64());
        if result.is_err() {
            metrics::counter!("pipeline_handler_failures_total", "handler" => handler)
                .increment(1);
        }
        result
    }
}
