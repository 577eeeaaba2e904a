//! Structured run logging.
//!
//! Every pipeline log line carries the video id and run id so a single run
//! can be followed across the thumbnail task and the main loop.

use tracing::{error, info, warn, Span};
use uuid::Uuid;

use safestream_models::VideoId;

/// Logger bound to one processing run.
#[derive(Debug, Clone)]
pub struct RunLogger {
    video_id: String,
    run_id: String,
}

impl RunLogger {
    pub fn new(video_id: &VideoId) -> Self {
        Self {
            video_id: video_id.to_string(),
            run_id: Uuid::new_v4().simple().to_string(),
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            video_id = %self.video_id,
            run_id = %self.run_id,
            "Run started: {}", message
        );
    }

    pub fn log_progress(&self, progress: u8) {
        info!(
            video_id = %self.video_id,
            run_id = %self.run_id,
            progress,
            "Run progress"
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            video_id = %self.video_id,
            run_id = %self.run_id,
            "Run warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            video_id = %self.video_id,
            run_id = %self.run_id,
            "Run error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            video_id = %self.video_id,
            run_id = %self.run_id,
            "Run completed: {}", message
        );
    }

    pub fn video_id(&self) -> &str {
        &self.video_id
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Span wrapping the whole run.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "processing_run",
            video_id = %self.video_id,
            run_id = %self.run_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_ids_are_unique_per_run() {
        let id = VideoId::from("v1");
        let a = RunLogger::new(&id);
        let b = RunLogger::new(&id);

        assert_eq!(a.video_id(), "v1");
        assert_ne!(a.run_id(), b.run_id());
    }
}
