//! Filters for listing videos.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::user::UserId;
use crate::video::{SensitivityStatus, Video, VideoStatus};

/// Equality and range filters over video records.
///
/// All set fields must match. Ranges are inclusive.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoQuery {
    pub status: Option<VideoStatus>,
    pub sensitivity_status: Option<SensitivityStatus>,
    pub category: Option<String>,
    pub uploader: Option<UserId>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
    pub min_size: Option<u64>,
    pub max_size: Option<u64>,
}

impl VideoQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Completed, safe videos from every uploader.
    pub fn public_feed(mut self) -> Self {
        self.status = Some(VideoStatus::Completed);
        self.sensitivity_status = Some(SensitivityStatus::Safe);
        self.uploader = None;
        self
    }

    pub fn with_status(mut self, status: VideoStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_uploader(mut self, uploader: UserId) -> Self {
        self.uploader = Some(uploader);
        self
    }

    pub fn updated_before(self, cutoff: DateTime<Utc>) -> StaleQuery {
        StaleQuery {
            query: self,
            updated_before: cutoff,
        }
    }

    pub fn matches(&self, video: &Video) -> bool {
        if self.status.is_some_and(|s| s != video.status) {
            return false;
        }
        if self
            .sensitivity_status
            .is_some_and(|s| s != video.sensitivity_status)
        {
            return false;
        }
        if let Some(ref category) = self.category {
            if video.category.as_deref() != Some(category.as_str()) {
                return false;
            }
        }
        if let Some(ref uploader) = self.uploader {
            if &video.uploader != uploader {
                return false;
            }
        }
        if self.created_from.is_some_and(|from| video.created_at < from) {
            return false;
        }
        if self.created_to.is_some_and(|to| video.created_at > to) {
            return false;
        }
        if self.min_size.is_some_and(|min| video.size < min) {
            return false;
        }
        if self.max_size.is_some_and(|max| video.size > max) {
            return false;
        }
        true
    }
}

/// A query restricted to records not touched since `updated_before`.
#[derive(Debug, Clone, PartialEq)]
pub struct StaleQuery {
    pub query: VideoQuery,
    pub updated_before: DateTime<Utc>,
}

impl StaleQuery {
    pub fn matches(&self, video: &Video) -> bool {
        self.query.matches(video) && video.updated_at < self.updated_before
    }
}
