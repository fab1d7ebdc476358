//! Dedup bookkeeping for at-least-once delivery.
//!
//! - [`SetStore`] abstracts the key/value-with-sets store
//! - [`RedisSetStore`] and [`InMemorySetStore`] implement it
//! - [`DedupCache`] records which correlation IDs a service has fully handled

pub mod cache;
pub mod error;
pub mod memory;
pub mod redis_store;
pub mod store;

pub use cache::{DedupCache, PROCESSED_MESSAGE_TTL};
pub use error::{CacheError, Result};
pub use memory::InMemorySetStore;
pub use redis_store::RedisSetStore;
pub use store::SetStore;
