//! A handler that logs every saga message seen on the bus.

use std::sync::Arc;

use async_trait::async_trait;
use broker::Channel;
use chrono::Utc;
use message::Message;
use pipeline::{HandlerError, MessageHandler};

/// Logs each message with its saga, latest decorator and end-to-end latency.
///
/// Messages carrying an error decoration are logged at warn level.
#[derive(Debug, Default)]
pub struct TapHandler;

impl TapHandler {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MessageHandler for TapHandler {
    fn name(&self) -> &str {
        "tap"
    }

    async fn handle(
        &self,
        _channel: &Arc<dyn Channel>,
        message: &Message,
    ) -> Result<(), HandlerError> {
        metrics::counter!("tap_messages_total", "saga" => message.saga().to_string()).increment(1);

        let latency_ms = message
            .publish_time()
            .map(|published| (Utc::now() - published).num_milliseconds());
        let last_service = message.last_service_decoration().unwrap_or("unknown");

        match message.error_decoration() {
            Some(failed) => tracing::warn!(
                correlation_id = %message.correlation_id(),
                saga = message.saga(),
                last_service,
                failed_service = %failed.service,
                error = %failed.error().unwrap_or_default(),
                "saga message carries an error"
            ),
            None => tracing::info!(
                correlation_id = %message.correlation_id(),
                saga = message.saga(),
                last_service,
                decorations = message.decorations().len(),
                latency_ms,
                "saga message"
            ),
        }
        Ok(())
    }
}
