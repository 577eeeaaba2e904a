//! SafeStream HTTP API.
//!
//! This crate provides:
//! - Video upload, listing, range streaming and deletion
//! - Bearer token authentication with role checks
//! - Live status updates over WebSocket
//! - Rate limiting, security headers and Prometheus metrics

pub mod auth;
pub mod cache;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod ws;

pub use auth::{AuthUser, JwtKeys};
pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
