//! Progress pacing for processing runs.

use std::time::Duration;

use async_trait::async_trait;

/// Percentage added per tick.
pub const PROGRESS_STEP: u8 = 10;

/// Decides when a run may advance to the next progress value.
#[async_trait]
pub trait ProgressSource: Send + Sync {
    /// Resolve once the run may report `next` percent.
    async fn advance(&self, next: u8);
}

/// Fixed-interval ticker.
#[derive(Debug, Clone)]
pub struct TickingProgress {
    interval: Duration,
}

impl TickingProgress {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl Default for TickingProgress {
    fn default() -> Self {
        Self::new(Duration::from_millis(1000))
    }
}

#[async_trait]
impl ProgressSource for TickingProgress {
    async fn advance(&self, _next: u8) {
        tokio::time::sleep(self.interval).await;
    }
}

/// Progress values a successful run reports after the initial 0.
pub fn progress_steps() -> impl Iterator<Item = u8> {
    (1..=100 / PROGRESS_STEP).map(|i| i * PROGRESS_STEP)
}
