//! Persistence for the SafeStream backend.
//!
//! This crate provides:
//! - The `VideoStore` and `UserStore` seams
//! - Firestore REST implementations (service account or emulator auth)
//! - An in-memory implementation with the same filter semantics
//! - Token caching, retry with backoff, request metrics

pub mod client;
pub mod error;
pub mod memory;
pub mod metrics;
pub mod repos;
pub mod retry;
pub mod store;
pub mod token_cache;
pub mod types;

#[cfg(test)]
mod client_tests;

pub use client::{FirestoreClient, FirestoreConfig};
pub use error::{FirestoreError, FirestoreResult};
pub use memory::{InMemoryUserStore, InMemoryVideoStore};
pub use repos::{FirestoreUserStore, FirestoreVideoStore};
pub use retry::RetryConfig;
pub use store::{UserStore, VideoStore};
pub use types::{Document, FromFirestoreValue, ToFirestoreValue, Value};

#[cfg(any(test, feature = "test-support"))]
pub use store::{MockUserStore, MockVideoStore};
