//! Live status events pushed to connected clients.
//!
//! Events are hints: clients reconcile against the video record when in doubt.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::video::{Verdict, VideoId, VideoStatus};

/// Status carried by a live event. `pending` never appears on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Processing,
    Completed,
    Failed,
}

impl From<EventStatus> for VideoStatus {
    fn from(status: EventStatus) -> Self {
        match status {
            EventStatus::Processing => VideoStatus::Processing,
            EventStatus::Completed => VideoStatus::Completed,
            EventStatus::Failed => VideoStatus::Failed,
        }
    }
}

/// `{videoId, status, progress, sensitivityStatus?}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    pub video_id: VideoId,
    pub status: EventStatus,
    /// 0-100
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensitivity_status: Option<Verdict>,
}

impl StatusEvent {
    pub fn processing(video_id: &VideoId, progress: u8) -> Self {
        Self {
            video_id: video_id.clone(),
            status: EventStatus::Processing,
            progress: progress.min(100),
            sensitivity_status: None,
        }
    }

    pub fn completed(video_id: &VideoId, verdict: Verdict) -> Self {
        Self {
            video_id: video_id.clone(),
            status: EventStatus::Completed,
            progress: 100,
            sensitivity_status: Some(verdict),
        }
    }

    pub fn failed(video_id: &VideoId) -> Self {
        Self {
            video_id: video_id.clone(),
            status: EventStatus::Failed,
            progress: 0,
            sensitivity_status: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self.status, EventStatus::Processing)
    }
}

/// Envelope for messages sent over the live socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "event", content = "data")]
pub enum LiveMessage {
    #[serde(rename = "videoStatusUpdate")]
    VideoStatusUpdate(StatusEvent),
}

impl LiveMessage {
    pub fn event_name(&self) -> &'static str {
        match self {
            LiveMessage::VideoStatusUpdate(_) => "videoStatusUpdate",
        }
    }
}

impl From<StatusEvent> for LiveMessage {
    fn from(event: StatusEvent) -> Self {
        LiveMessage::VideoStatusUpdate(event)
    }
}
