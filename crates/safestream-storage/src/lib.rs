//! Local artifact storage.
//!
//! This crate provides:
//! - Streaming upload of originals as `video-{millis}{ext}`
//! - Thumbnail naming under `thumbnails/`
//! - Traversal-checked path resolution for reads
//! - Idempotent deletion of a video's files

pub mod artifacts;
pub mod error;
pub mod keys;

pub use artifacts::{ArtifactStore, StoredFile, THUMBNAILS_DIR};
pub use error::{StorageError, StorageResult};
pub use keys::{thumbnail_key, thumbnail_name, upload_filename, validate_key};
