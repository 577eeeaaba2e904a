//! Active-run registry.

use std::collections::HashSet;

use async_trait::async_trait;
use tokio::sync::Mutex;

use safestream_models::VideoId;

use crate::error::QueueResult;

/// Tracks which videos have a run in flight.
///
/// Every successful `try_acquire` must be paired with exactly one `release`.
#[async_trait]
pub trait RunRegistry: Send + Sync {
    /// Mark `id` active. Returns `false` if a run already holds it.
    async fn try_acquire(&self, id: &VideoId) -> QueueResult<bool>;

    /// Clear the marker for `id`.
    async fn release(&self, id: &VideoId) -> QueueResult<()>;

    async fn is_active(&self, id: &VideoId) -> QueueResult<bool>;
}

/// Registry local to this process.
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    active: Mutex<HashSet<VideoId>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn active_count(&self) -> usize {
        self.active.lock().await.len()
    }

    /// Drop every marker. Used at shutdown.
    pub async fn clear(&self) {
        self.active.lock().await.clear();
    }
}

#[async_trait]
impl RunRegistry for InMemoryRegistry {
    async fn try_acquire(&self, id: &VideoId) -> QueueResult<bool> {
        Ok(self.active.lock().await.insert(id.clone()))
    }

    async fn release(&self, id: &VideoId) -> QueueResult<()> {
        self.active.lock().await.remove(id);
        Ok(())
    }

    async fn is_active(&self, id: &VideoId) -> QueueResult<bool> {
        Ok(self.active.lock().await.contains(id))
    }
}
