//! Request handlers.

pub mod health;
pub mod users;
pub mod videos;

pub use health::*;
pub use users::*;
pub use videos::*;

use serde::Serialize;

/// `{"message": "..."}` acknowledgement body.
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
