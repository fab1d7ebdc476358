//! Publish/subscribe delivery discipline for saga messages.
//!
//! This crate provides:
//! - [`MessageHandler`] for objects the subscriber invokes per message, and
//!   the [`Instrumented`] middleware applied to every one of them
//! - [`Publisher`] for stamping and emitting messages (fire-and-forget)
//! - [`Subscriber`] for consuming a service queue with explicit
//!   acknowledgement: parse failures are rejected, handler failures are
//!   isolated, every parsed message is acknowledged exactly once
//! - [`shutdown`] for closing the broker channel and connection

pub mod error;
pub mod handler;
pub mod publisher;
pub mod shutdown;
pub mod subscriber;

pub use error::{HandlerError, PipelineError, Result};
pub use handler::{Instrumented, MessageHandler};
pub use publisher::{Publisher, RetryPolicy};
pub use shutdown::shutdown;
pub use subscriber::{Subscriber, SubscriberHandle};
