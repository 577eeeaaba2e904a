//! Coordination primitives for processing runs.
//!
//! This crate provides:
//! - [`RunRegistry`]: at most one active run per video id
//! - An in-process registry and a Redis lease registry
//! - [`EventBroadcaster`]: volatile fan-out of status events

pub mod broadcaster;
pub mod error;
pub mod lease;
pub mod registry;

pub use broadcaster::{EventBroadcaster, DEFAULT_EVENT_CAPACITY};
pub use error::{QueueError, QueueResult};
pub use lease::{RedisLeaseRegistry, DEFAULT_LEASE_TTL};
pub use registry::{InMemoryRegistry, RunRegistry};
