//! AMQP 0-9-1 transport backed by `lapin`.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicRejectOptions,
    ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, ConnectionProperties, ExchangeKind};

use crate::channel::{
    Acker, BrokerConnection, Channel, Connection, Connector, Delivery, DeliveryStream,
    ErrorObserver,
};
use crate::{BrokerError, Result};

const REPLY_SUCCESS: u16 = 200;

fn channel_error(e: lapin::Error) -> BrokerError {
    BrokerError::Channel(e.to_string())
}

/// Connects to an AMQP broker such as RabbitMQ.
#[derive(Debug, Clone)]
pub struct AmqpConnector {
    uri: String,
}

impl AmqpConnector {
    /// Creates a connector for an `amqp://` URI.
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into() }
    }
}

#[async_trait]
impl Connector for AmqpConnector {
    async fn connect(&self) -> Result<BrokerConnection> {
        let connection = lapin::Connection::connect(&self.uri, ConnectionProperties::default())
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;
        let channel = connection
            .create_channel()
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;

        Ok(BrokerConnection::new(
            Arc::new(AmqpConnection { inner: connection }),
            Arc::new(AmqpChannel { inner: channel }),
        ))
    }
}

struct AmqpConnection {
    inner: lapin::Connection,
}

#[async_trait]
impl Connection for AmqpConnection {
    fn on_error(&self, observer: ErrorObserver) {
        self.inner.on_error(move |e| {
            observer(&BrokerError::Connection(e.to_string()));
        });
    }

    async fn close(&self) -> Result<()> {
        self.inner
            .close(REPLY_SUCCESS, "shutdown")
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))
    }
}

struct AmqpChannel {
    inner: lapin::Channel,
}

#[async_trait]
impl Channel for AmqpChannel {
    async fn declare_fanout_exchange(&self, exchange: &str) -> Result<()> {
        let options = ExchangeDeclareOptions {
            durable: true,
            ..Default::default()
        };
        self.inner
            .exchange_declare(exchange, ExchangeKind::Fanout, options, FieldTable::default())
            .await
            .map_err(channel_error)
    }

    async fn declare_queue(&self, queue: &str) -> Result<()> {
        let options = QueueDeclareOptions {
            durable: true,
            ..Default::default()
        };
        self.inner
            .queue_declare(queue, options, FieldTable::default())
            .await
            .map(|_| ())
            .map_err(channel_error)
    }

    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<()> {
        self.inner
            .queue_bind(
                queue,
                exchange,
                routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(channel_error)
    }

    async fn publish(&self, exchange: &str, routing_key: &str, payload: &[u8]) -> Result<()> {
        // The returned confirm is dropped: publishing is fire-and-forget.
        self.inner
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default().with_content_type("application/json".into()),
            )
            .await
            .map(|_confirm| ())
            .map_err(channel_error)
    }

    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream> {
        let consumer = self
            .inner
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions {
                    no_ack: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(channel_error)?;

        let deliveries = consumer.map(|item| {
            item.map(|delivery| {
                Delivery::new(
                    delivery.delivery_tag,
                    delivery.redelivered,
                    delivery.data,
                    Box::new(AmqpAcker {
                        inner: delivery.acker,
                    }),
                )
            })
            .map_err(channel_error)
        });
        Ok(Box::pin(deliveries))
    }

    fn on_error(&self, observer: ErrorObserver) {
        self.inner.on_error(move |e| {
            observer(&BrokerError::Channel(e.to_string()));
        });
    }

    async fn close(&self) -> Result<()> {
        self.inner
            .close(REPLY_SUCCESS, "shutdown")
            .await
            .map_err(channel_error)
    }
}

struct AmqpAcker {
    inner: lapin::acker::Acker,
}

#[async_trait]
impl Acker for AmqpAcker {
    async fn ack(&self) -> Result<()> {
        self.inner
            .ack(BasicAckOptions::default())
            .await
            .map(|_| ())
            .map_err(channel_error)
    }

    async fn reject(&self, requeue: bool) -> Result<()> {
        self.inner
            .reject(BasicRejectOptions { requeue })
            .await
            .map(|_| ())
            .map_err(channel_error)
    }
}
