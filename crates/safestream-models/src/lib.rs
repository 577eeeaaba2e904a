//! Shared data models for the SafeStream backend.
//!
//! This crate provides Serde-serializable types for:
//! - Video records and their lifecycle
//! - Users and roles
//! - Live status events
//! - List filters

pub mod event;
pub mod query;
pub mod user;
pub mod video;

pub use event::{EventStatus, LiveMessage, StatusEvent};
pub use query::{StaleQuery, VideoQuery};
pub use user::{User, UserId, UserRole};
pub use video::{
    ParseStatusError, SensitivityStatus, Verdict, Video, VideoId, VideoPatch, VideoStatus,
};
