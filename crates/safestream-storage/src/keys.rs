//! Artifact naming.

use std::path::Path;

use chrono::{DateTime, Utc};
use safestream_models::VideoId;

use crate::artifacts::THUMBNAILS_DIR;
use crate::error::{StorageError, StorageResult};

/// Longest extension carried over from the client filename.
const MAX_EXT_LEN: usize = 10;

/// Stored name for an upload: `video-{millis}{.ext}`.
///
/// The extension is taken from the client filename, lowercased, and dropped
/// when it is not plain alphanumeric.
pub fn upload_filename(original_name: &str, at: DateTime<Utc>) -> String {
    let ext = Path::new(original_name)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.len() <= MAX_EXT_LEN)
        .filter(|e| e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|e| format!(".{}", e.to_ascii_lowercase()))
        .unwrap_or_default();

    format!("video-{}{}", at.timestamp_millis(), ext)
}

pub fn thumbnail_name(video_id: &VideoId) -> String {
    format!("thumb-{}.png", video_id)
}

/// Thumbnail path relative to the upload root, as stored on the record.
pub fn thumbnail_key(video_id: &VideoId) -> String {
    format!("{}/{}", THUMBNAILS_DIR, thumbnail_name(video_id))
}

/// Keys are relative, forward-slash paths without traversal.
pub fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty() {
        return Err(StorageError::InvalidKey("empty key".to_string()));
    }
    if key.starts_with('/') || key.contains('\\') || key.contains('\0') {
        return Err(StorageError::InvalidKey(format!(
            "key must be a relative path: {}",
            key
        )));
    }
    if key.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..") {
        return Err(StorageError::InvalidKey(format!(
            "key contains invalid segments: {}",
            key
        )));
    }
    Ok(())
}
