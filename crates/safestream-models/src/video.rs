//! Video records and their lifecycle enums.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::user::UserId;

/// Unique identifier for an uploaded video.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct VideoId(pub String);

impl VideoId {
    /// Generate a new random video ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for VideoId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for VideoId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for VideoId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Error returned when a status string does not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value}")]
pub struct ParseStatusError {
    pub kind: &'static str,
    pub value: String,
}

/// Processing status of a video.
///
/// Moves forward only: `pending → processing → completed | failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum VideoStatus {
    /// Uploaded, not yet picked up by the pipeline
    #[default]
    Pending,
    /// A processing run is active
    Processing,
    /// Processing finished with a verdict
    Completed,
    /// Processing failed; no automatic retry
    Failed,
}

impl VideoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoStatus::Pending => "pending",
            VideoStatus::Processing => "processing",
            VideoStatus::Completed => "completed",
            VideoStatus::Failed => "failed",
        }
    }

    /// Terminal states accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, VideoStatus::Completed | VideoStatus::Failed)
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: VideoStatus) -> bool {
        matches!(
            (self, next),
            (VideoStatus::Pending, VideoStatus::Processing)
                | (VideoStatus::Processing, VideoStatus::Completed)
                | (VideoStatus::Processing, VideoStatus::Failed)
        )
    }
}

impl fmt::Display for VideoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for VideoStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(VideoStatus::Pending),
            "processing" => Ok(VideoStatus::Processing),
            "completed" => Ok(VideoStatus::Completed),
            "failed" => Ok(VideoStatus::Failed),
            other => Err(ParseStatusError {
                kind: "video status",
                value: other.to_string(),
            }),
        }
    }
}

/// Content-safety status of a video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum SensitivityStatus {
    #[default]
    Pending,
    Safe,
    Flagged,
}

impl SensitivityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SensitivityStatus::Pending => "pending",
            SensitivityStatus::Safe => "safe",
            SensitivityStatus::Flagged => "flagged",
        }
    }

    /// The verdict this status records, `None` while unclassified.
    pub fn verdict(&self) -> Option<Verdict> {
        match self {
            SensitivityStatus::Pending => None,
            SensitivityStatus::Safe => Some(Verdict::Safe),
            SensitivityStatus::Flagged => Some(Verdict::Flagged),
        }
    }
}

impl fmt::Display for SensitivityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SensitivityStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SensitivityStatus::Pending),
            "safe" => Ok(SensitivityStatus::Safe),
            "flagged" => Ok(SensitivityStatus::Flagged),
            other => Err(ParseStatusError {
                kind: "sensitivity status",
                value: other.to_string(),
            }),
        }
    }
}

/// Binary output of a classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Safe,
    Flagged,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Safe => "safe",
            Verdict::Flagged => "flagged",
        }
    }
}

impl From<Verdict> for SensitivityStatus {
    fn from(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Safe => SensitivityStatus::Safe,
            Verdict::Flagged => SensitivityStatus::Flagged,
        }
    }
}

/// Video record as persisted in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Video {
    #[serde(rename = "_id", alias = "id")]
    pub id: VideoId,

    pub title: String,

    #[serde(default)]
    pub description: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    /// Name of the stored original inside the upload directory
    pub filename: String,

    /// Client-side filename at upload time
    pub original_name: String,

    #[serde(default)]
    pub mimetype: String,

    /// Size of the original in bytes
    pub size: u64,

    /// Owning user
    pub uploader: UserId,

    #[serde(default)]
    pub status: VideoStatus,

    #[serde(default)]
    pub sensitivity_status: SensitivityStatus,

    /// Thumbnail path relative to the upload directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl Video {
    /// Create a pending record for a freshly stored upload.
    pub fn new(
        uploader: UserId,
        title: impl Into<String>,
        filename: impl Into<String>,
        original_name: impl Into<String>,
        size: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: VideoId::new(),
            title: title.into(),
            description: String::new(),
            category: None,
            filename: filename.into(),
            original_name: original_name.into(),
            mimetype: String::new(),
            size,
            uploader,
            status: VideoStatus::Pending,
            sensitivity_status: SensitivityStatus::Pending,
            thumbnail: None,
            duration: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_category(mut self, category: Option<String>) -> Self {
        self.category = category.filter(|c| !c.trim().is_empty());
        self
    }

    pub fn with_mimetype(mut self, mimetype: impl Into<String>) -> Self {
        self.mimetype = mimetype.into();
        self
    }

    /// Apply a partial update in place.
    pub fn apply(&mut self, patch: &VideoPatch) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(sensitivity) = patch.sensitivity_status {
            self.sensitivity_status = sensitivity;
        }
        if let Some(ref thumbnail) = patch.thumbnail {
            self.thumbnail = Some(thumbnail.clone());
        }
        self.updated_at = Utc::now();
    }
}

/// Partial update of the pipeline-owned fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoPatch {
    pub status: Option<VideoStatus>,
    pub sensitivity_status: Option<SensitivityStatus>,
    pub thumbnail: Option<String>,
}

impl VideoPatch {
    pub fn status(status: VideoStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn completed(sensitivity: SensitivityStatus) -> Self {
        Self {
            status: Some(VideoStatus::Completed),
            sensitivity_status: Some(sensitivity),
            thumbnail: None,
        }
    }

    pub fn thumbnail(path: impl Into<String>) -> Self {
        Self {
            thumbnail: Some(path.into()),
            ..Default::default()
        }
    }

    /// Names of the fields this patch touches (store field names).
    pub fn field_names(&self) -> Vec<&'static str> {
        let mut fields = Vec::with_capacity(3);
        if self.status.is_some() {
            fields.push("status");
        }
        if self.sensitivity_status.is_some() {
            fields.push("sensitivityStatus");
        }
        if self.thumbnail.is_some() {
            fields.push("thumbnail");
        }
        fields
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.sensitivity_status.is_none() && self.thumbnail.is_none()
    }
}
