//! Shared identifiers and error reporting used across the saga runtime.

pub mod report;
pub mod types;

pub use report::{ErrorReport, format_error};
pub use types::{CorrelationId, ServiceId};
