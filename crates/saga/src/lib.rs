//! Saga admissibility and compensation for services on the fan-out bus.
//!
//! Each service takes part in a saga by listening for its messages:
//! - [`SagaValidator`] decides whether a message is admissible, and triggers
//!   the service's [`RollbackHandler`] when a saga it already handled failed
//!   downstream
//! - [`SagaListener`] runs a service's [`SagaStep`] for admissible messages
//!   and records them in the processed-message cache
//!
//! A message carrying an error decoration never moves forward; services that
//! already contributed to it compensate.

pub mod error;
pub mod listener;
pub mod validator;

pub use error::{Result, SagaError};
pub use listener::{SagaListener, SagaStep};
pub use validator::{
    RollbackHandler, SagaValidator, ValidationOutcome, ValidationReason, ValidationRules,
};
