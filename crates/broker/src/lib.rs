//! Broker transport for the saga runtime.
//!
//! This crate provides:
//! - [`Channel`], [`Connection`] and [`Connector`] traits over a fan-out
//!   message broker, with explicit-acknowledgement [`Delivery`] streams
//! - [`AmqpConnector`] for RabbitMQ and other AMQP 0-9-1 brokers
//! - [`InMemoryBroker`] with the same semantics, for tests
//! - [`ConnectionManager`] for connection retry and queue topology

pub mod amqp;
pub mod channel;
pub mod connection;
pub mod error;
pub mod instrument;
pub mod memory;

pub use amqp::AmqpConnector;
pub use channel::{
    Acker, BrokerConnection, Channel, Connection, Connector, Delivery, DeliveryStream,
    ErrorObserver,
};
pub use connection::{ConnectionManager, FANOUT_EXCHANGE, ROUTING_KEY};
pub use error::{BrokerError, Result};
pub use instrument::InstrumentedChannel;
pub use memory::InMemoryBroker;
