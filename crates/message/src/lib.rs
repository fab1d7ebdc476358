//! Saga message model.
//!
//! A [`Message`] carries one saga end to end. Every service that handles it
//! appends at most one [`Decoration`]; nothing is ever removed or reordered.
//! The JSON wire form uses camelCase field names and preserves any
//! caller-defined fields it does not know about.

pub mod decoration;
pub mod error;
pub mod message;

pub use decoration::Decoration;
pub use error::{MessageError, Result};
pub use message::{Message, MessageBuilder};
