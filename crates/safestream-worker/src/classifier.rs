//! Content-safety classification.

use async_trait::async_trait;
use rand::Rng;
use tracing::debug;

use safestream_models::{Verdict, VideoId};

use crate::error::{PipelineError, PipelineResult};

/// Produces a safety verdict for a video.
///
/// Called once per run, after progress reaches 100. Implementations must
/// return errors rather than panic; the caller enforces a timeout.
#[cfg_attr(any(test, feature = "test-support"), mockall::automock)]
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, video_id: &VideoId) -> PipelineResult<Verdict>;
}

/// Placeholder classifier returning `safe` with probability `safe_ratio`.
#[derive(Debug, Clone)]
pub struct RandomClassifier {
    safe_ratio: f64,
}

impl RandomClassifier {
    pub fn new(safe_ratio: f64) -> PipelineResult<Self> {
        if !(0.0..=1.0).contains(&safe_ratio) {
            return Err(PipelineError::config_error(format!(
                "safe ratio must be within 0..=1, got {}",
                safe_ratio
            )));
        }
        Ok(Self { safe_ratio })
    }
}

impl Default for RandomClassifier {
    fn default() -> Self {
        Self { safe_ratio: 0.7 }
    }
}

#[async_trait]
impl Classifier for RandomClassifier {
    async fn classify(&self, video_id: &VideoId) -> PipelineResult<Verdict> {
        let verdict = if rand::rng().random_bool(self.safe_ratio) {
            Verdict::Safe
        } else {
            Verdict::Flagged
        };
        debug!(video_id = %video_id, verdict = ?verdict, "Classified video");
        Ok(verdict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_extreme_ratios_are_deterministic() {
        let id = VideoId::from("v1");

        let always_safe = RandomClassifier::new(1.0).unwrap();
        let never_safe = RandomClassifier::new(0.0).unwrap();
        for _ in 0..20 {
            assert_eq!(always_safe.classify(&id).await.unwrap(), Verdict::Safe);
            assert_eq!(never_safe.classify(&id).await.unwrap(), Verdict::Flagged);
        }
    }

    #[test]
    fn test_ratio_out_of_range_is_rejected() {
        assert!(RandomClassifier::new(1.5).is_err());
        assert!(RandomClassifier::new(-0.1).is_err());
    }
}
