//! Pipeline error types.

use thiserror::Error;

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// The video record does not exist.
    #[error("Video not found: {0}")]
    NotFound(String),

    /// An artifact is missing or unreadable.
    #[error("Resource unavailable: {0}")]
    ResourceUnavailable(String),

    #[error("External tool failed: {0}")]
    ExternalToolFailure(String),

    #[error("Classification failed: {0}")]
    ClassificationFailure(String),

    #[error("Persistence failed: {0}")]
    PersistenceFailure(String),

    #[error("Run timed out after {0} seconds")]
    Timeout(u64),

    #[error("Run cancelled")]
    Cancelled,

    #[error("Run panicked: {0}")]
    Panicked(String),

    #[error("Run registry error: {0}")]
    Registry(#[from] safestream_queue::QueueError),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl PipelineError {
    pub fn classification(msg: impl Into<String>) -> Self {
        Self::ClassificationFailure(msg.into())
    }

    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::PersistenceFailure(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::NotFound(_) => "not_found",
            PipelineError::ResourceUnavailable(_) => "resource_unavailable",
            PipelineError::ExternalToolFailure(_) => "external_tool",
            PipelineError::ClassificationFailure(_) => "classification",
            PipelineError::PersistenceFailure(_) => "persistence",
            PipelineError::Timeout(_) => "timeout",
            PipelineError::Cancelled => "cancelled",
            PipelineError::Panicked(_) => "panic",
            PipelineError::Registry(_) => "registry",
            PipelineError::ConfigError(_) => "config",
        }
    }
}

impl From<safestream_firestore::FirestoreError> for PipelineError {
    fn from(e: safestream_firestore::FirestoreError) -> Self {
        Self::PersistenceFailure(e.to_string())
    }
}

impl From<safestream_media::MediaError> for PipelineError {
    fn from(e: safestream_media::MediaError) -> Self {
        if e.is_resource_unavailable() {
            Self::ResourceUnavailable(e.to_string())
        } else {
            Self::ExternalToolFailure(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use safestream_media::MediaError;

    #[test]
    fn test_media_errors_split_by_cause() {
        let missing: PipelineError = MediaError::FileNotFound("a.mp4".into()).into();
        assert!(matches!(missing, PipelineError::ResourceUnavailable(_)));

        let tool: PipelineError = MediaError::ffmpeg_failed("bad codec", None, Some(1)).into();
        assert_eq!(tool.kind(), "external_tool");
    }
}
