//! Reconciliation of runs interrupted by a crash or restart.
//!
//! A record left in `processing` with no local run and no update within the
//! grace window cannot finish on its own. The sweep marks it `failed` and
//! publishes a `failed` event so connected clients stop waiting.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use metrics::counter;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use safestream_firestore::VideoStore;
use safestream_models::{StatusEvent, Video};
use safestream_queue::{EventBroadcaster, RunRegistry};

use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};

/// Periodic sweep over stale `processing` records.
pub struct ReconciliationSweep {
    store: Arc<dyn VideoStore>,
    registry: Arc<dyn RunRegistry>,
    events: EventBroadcaster,
    grace: Duration,
    period: Duration,
}

impl ReconciliationSweep {
    pub fn new(
        store: Arc<dyn VideoStore>,
        registry: Arc<dyn RunRegistry>,
        events: EventBroadcaster,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            store,
            registry,
            events,
            grace: config.reconcile_grace,
            period: config.reconcile_interval(),
        }
    }

    /// Run forever in the background. The first sweep happens immediately.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    pub async fn run(&self) {
        info!(
            "Starting reconciliation sweep (grace: {:?}, interval: {:?})",
            self.grace, self.period
        );

        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;

            match self.sweep_once().await {
                Ok(0) => debug!("Reconciliation sweep found nothing stale"),
                Ok(n) => info!("Reconciliation sweep failed {} stale runs", n),
                Err(e) => error!("Reconciliation sweep error: {}", e),
            }
        }
    }

    /// One pass. Returns how many records were marked `failed`.
    pub async fn sweep_once(&self) -> PipelineResult<usize> {
        let grace = chrono::Duration::from_std(self.grace)
            .map_err(|e| PipelineError::config_error(format!("grace window: {}", e)))?;
        let cutoff = Utc::now() - grace;

        let stale = self.store.find_stale_processing(cutoff).await?;
        let mut recovered = 0;

        for video in stale {
            match self.recover(&video).await {
                Ok(true) => recovered += 1,
                Ok(false) => {}
                Err(e) => warn!(video_id = %video.id, "Failed to reconcile stale run: {}", e),
            }
        }

        if recovered > 0 {
            counter!("pipeline_reconciled_total").increment(recovered as u64);
        }
        Ok(recovered)
    }

    async fn recover(&self, video: &Video) -> PipelineResult<bool> {
        if self.registry.is_active(&video.id).await? {
            return Ok(false);
        }

        warn!(
            video_id = %video.id,
            updated_at = %video.updated_at,
            "Detected stale run, marking failed"
        );

        match self.store.fail_unfinished(&video.id).await {
            Ok(true) => {}
            Ok(false) => return Ok(false),
            Err(e) if e.is_not_found() => return Ok(false),
            Err(e) => return Err(e.into()),
        }

        self.events.publish(StatusEvent::failed(&video.id));
        Ok(true)
    }
}
