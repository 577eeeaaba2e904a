//! Processing runs.
//!
//! One run per video: acquire the registry slot, move the record to
//! `processing`, kick off the thumbnail in the background, tick progress to
//! 100, classify, then persist the verdict. Any failure after the slot is
//! taken ends in a single best-effort `failed` write and a `failed` event,
//! unless the record already reached a terminal status.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures_util::FutureExt;
use metrics::{counter, histogram};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, Instrument};

use safestream_firestore::VideoStore;
use safestream_media::{FfmpegInspector, MediaInspector};
use safestream_models::{StatusEvent, Verdict, Video, VideoId, VideoPatch, VideoStatus};
use safestream_queue::{EventBroadcaster, RunRegistry};
use safestream_storage::{thumbnail_key, thumbnail_name, ArtifactStore};

use crate::classifier::{Classifier, RandomClassifier};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::logging::RunLogger;
use crate::progress::{progress_steps, ProgressSource, TickingProgress};

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed(Verdict),
    Failed,
    /// Cancelled because the video was deleted
    Cancelled,
    /// Another run already held the slot
    Duplicate,
    /// The record vanished before the run started
    Missing,
    /// The record was not `pending`
    Skipped,
}

impl RunOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            RunOutcome::Completed(_) => "completed",
            RunOutcome::Failed => "failed",
            RunOutcome::Cancelled => "cancelled",
            RunOutcome::Duplicate => "duplicate",
            RunOutcome::Missing => "missing",
            RunOutcome::Skipped => "skipped",
        }
    }
}

/// Drives processing runs and owns their cancellation handles.
#[derive(Clone)]
pub struct ProcessingService {
    config: PipelineConfig,
    store: Arc<dyn VideoStore>,
    registry: Arc<dyn RunRegistry>,
    events: EventBroadcaster,
    artifacts: ArtifactStore,
    inspector: Arc<dyn MediaInspector>,
    classifier: Arc<dyn Classifier>,
    progress: Arc<dyn ProgressSource>,
    cancels: Arc<Mutex<HashMap<VideoId, watch::Sender<bool>>>>,
}

impl ProcessingService {
    /// Service with the FFmpeg inspector, the random classifier and a
    /// fixed-interval ticker.
    pub fn new(
        config: PipelineConfig,
        store: Arc<dyn VideoStore>,
        registry: Arc<dyn RunRegistry>,
        events: EventBroadcaster,
        artifacts: ArtifactStore,
    ) -> PipelineResult<Self> {
        let classifier = RandomClassifier::new(config.safe_ratio)?;
        let progress = TickingProgress::new(config.tick_interval);

        Ok(Self {
            config,
            store,
            registry,
            events,
            artifacts,
            inspector: Arc::new(FfmpegInspector::new()),
            classifier: Arc::new(classifier),
            progress: Arc::new(progress),
            cancels: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn with_inspector(mut self, inspector: Arc<dyn MediaInspector>) -> Self {
        self.inspector = inspector;
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_progress_source(mut self, progress: Arc<dyn ProgressSource>) -> Self {
        self.progress = progress;
        self
    }

    pub fn events(&self) -> &EventBroadcaster {
        &self.events
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Start a run in the background and return immediately.
    ///
    /// Triggering a video that already has an active run is a no-op; the
    /// handle then resolves to [`RunOutcome::Duplicate`].
    pub fn start_processing(&self, video_id: VideoId) -> JoinHandle<RunOutcome> {
        let service = self.clone();
        tokio::spawn(async move { service.run(video_id).await })
    }

    /// Signal the active run for `video_id` to stop. Returns `false` if
    /// this process has no run for it.
    pub async fn cancel_processing(&self, video_id: &VideoId) -> bool {
        match self.cancels.lock().await.get(video_id) {
            Some(tx) => {
                tx.send_replace(true);
                debug!(video_id = %video_id, "Cancellation requested");
                true
            }
            None => false,
        }
    }

    pub async fn is_active(&self, video_id: &VideoId) -> PipelineResult<bool> {
        Ok(self.registry.is_active(video_id).await?)
    }

    async fn run(self, video_id: VideoId) -> RunOutcome {
        match self.registry.try_acquire(&video_id).await {
            Ok(true) => {}
            Ok(false) => {
                counter!("pipeline_runs_total", "outcome" => "duplicate").increment(1);
                debug!(video_id = %video_id, "Run already active, ignoring trigger");
                return RunOutcome::Duplicate;
            }
            Err(e) => {
                // Slot state unknown: leave the record alone
                error!(video_id = %video_id, "Run registry unavailable: {}", e);
                counter!("pipeline_runs_total", "outcome" => "registry_error").increment(1);
                return RunOutcome::Failed;
            }
        }

        let logger = RunLogger::new(&video_id);
        let span = logger.create_span();
        let outcome = self.supervise(&video_id, &logger).instrument(span).await;

        if let Err(e) = self.registry.release(&video_id).await {
            logger.log_error(&format!("Failed to release run slot: {}", e));
        }
        outcome
    }

    /// Run the steps under the run timeout, catching panics, and settle the
    /// outcome.
    async fn supervise(&self, video_id: &VideoId, logger: &RunLogger) -> RunOutcome {
        let (cancel_tx, mut cancel_rx) = watch::channel(false);
        self.cancels.lock().await.insert(video_id.clone(), cancel_tx);

        let started = Instant::now();
        counter!("pipeline_runs_started_total").increment(1);

        let steps = AssertUnwindSafe(self.drive(video_id, &mut cancel_rx, logger)).catch_unwind();
        let result = match tokio::time::timeout(self.config.run_timeout, steps).await {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => Err(PipelineError::Panicked(panic_message(panic))),
            Err(_) => Err(PipelineError::Timeout(self.config.run_timeout.as_secs())),
        };

        self.cancels.lock().await.remove(video_id);

        let outcome = match result {
            Ok(Some(verdict)) => {
                logger.log_completion(&format!("verdict {}", verdict.as_str()));
                RunOutcome::Completed(verdict)
            }
            Ok(None) => RunOutcome::Skipped,
            Err(PipelineError::NotFound(_)) => {
                debug!(video_id = %video_id, "Record missing, nothing to process");
                RunOutcome::Missing
            }
            Err(PipelineError::Cancelled) => {
                logger.log_warning("cancelled");
                self.events.publish(StatusEvent::failed(video_id));
                RunOutcome::Cancelled
            }
            Err(e) => {
                logger.log_error(&format!("{} [{}]", e, e.kind()));
                self.mark_failed(video_id, logger).await
            }
        };

        histogram!("pipeline_run_duration_seconds").record(started.elapsed().as_secs_f64());
        counter!("pipeline_runs_total", "outcome" => outcome.label()).increment(1);
        outcome
    }

    async fn drive(
        &self,
        video_id: &VideoId,
        cancel: &mut watch::Receiver<bool>,
        logger: &RunLogger,
    ) -> PipelineResult<Option<Verdict>> {
        let video = until_cancelled(cancel, self.store.find_by_id(video_id))
            .await??
            .ok_or_else(|| PipelineError::NotFound(video_id.to_string()))?;

        if !video.status.can_transition_to(VideoStatus::Processing) {
            logger.log_warning(&format!("status is {}, not starting", video.status));
            return Ok(None);
        }

        until_cancelled(
            cancel,
            self.store
                .update(video_id, &VideoPatch::status(VideoStatus::Processing)),
        )
        .await??;
        self.events.publish(StatusEvent::processing(video_id, 0));
        logger.log_start(&video.title);

        self.spawn_thumbnail(&video, cancel.clone(), logger.clone());

        for progress in progress_steps() {
            until_cancelled(cancel, self.progress.advance(progress)).await?;
            self.events.publish(StatusEvent::processing(video_id, progress));
            logger.log_progress(progress);
        }

        let verdict = until_cancelled(cancel, self.classify(video_id)).await??;

        until_cancelled(
            cancel,
            self.store
                .update(video_id, &VideoPatch::completed(verdict.into())),
        )
        .await??;
        self.events.publish(StatusEvent::completed(video_id, verdict));

        Ok(Some(verdict))
    }

    async fn classify(&self, video_id: &VideoId) -> PipelineResult<Verdict> {
        let timeout = self.config.classifier_timeout;
        match tokio::time::timeout(timeout, self.classifier.classify(video_id)).await {
            Ok(result) => result.map_err(|e| match e {
                e @ PipelineError::ClassificationFailure(_) => e,
                other => PipelineError::classification(other.to_string()),
            }),
            Err(_) => Err(PipelineError::classification(format!(
                "no verdict within {} seconds",
                timeout.as_secs()
            ))),
        }
    }

    /// Extract the thumbnail without blocking the run. Failures are logged.
    ///
    /// The extraction stops when the run is cancelled, and a thumbnail whose
    /// record vanished meanwhile is removed again.
    fn spawn_thumbnail(&self, video: &Video, cancel: watch::Receiver<bool>, logger: RunLogger) {
        let source = match self.artifacts.resolve(&video.filename) {
            Ok(path) => path,
            Err(e) => {
                counter!("pipeline_thumbnails_total", "outcome" => "failed").increment(1);
                logger.log_warning(&format!("Cannot locate original: {}", e));
                return;
            }
        };

        let output_dir = self.artifacts.thumbnails_dir();
        let name = thumbnail_name(&video.id);
        let key = thumbnail_key(&video.id);
        let video_id = video.id.clone();
        let inspector = Arc::clone(&self.inspector);
        let store = Arc::clone(&self.store);
        let artifacts = self.artifacts.clone();
        let span = logger.create_span();

        tokio::spawn(
            async move {
                let mut cancel = cancel;
                let extraction = inspector.extract_thumbnail(&source, &output_dir, &name);

                let written = match until_cancelled(&mut cancel, extraction).await {
                    Ok(Ok(path)) => path,
                    Ok(Err(e)) => {
                        counter!("pipeline_thumbnails_total", "outcome" => "failed").increment(1);
                        let e = PipelineError::from(e);
                        logger.log_warning(&format!("Thumbnail skipped [{}]: {}", e.kind(), e));
                        return;
                    }
                    Err(_) => {
                        counter!("pipeline_thumbnails_total", "outcome" => "cancelled").increment(1);
                        discard_thumbnail(&artifacts, &key, &logger).await;
                        return;
                    }
                };

                match store.update(&video_id, &VideoPatch::thumbnail(key.clone())).await {
                    Ok(()) => {
                        counter!("pipeline_thumbnails_total", "outcome" => "ok").increment(1);
                    }
                    Err(e) if e.is_not_found() => {
                        counter!("pipeline_thumbnails_total", "outcome" => "orphaned").increment(1);
                        logger.log_warning("Record deleted during extraction, removing thumbnail");
                        discard_thumbnail(&artifacts, &key, &logger).await;
                    }
                    Err(e) => {
                        logger.log_warning(&format!(
                            "Thumbnail {} written but not recorded: {}",
                            written.display(),
                            e
                        ));
                    }
                }
            }
            .instrument(span),
        );
    }

    /// One guarded write attempt, never retried, then the matching event.
    ///
    /// A record that already finished keeps its status; the run then reports
    /// what the store holds.
    async fn mark_failed(&self, video_id: &VideoId, logger: &RunLogger) -> RunOutcome {
        match self.store.fail_unfinished(video_id).await {
            Ok(true) => {}
            Ok(false) => {
                if let Some(verdict) = self.stored_verdict(video_id).await {
                    logger.log_warning("record already completed, keeping it");
                    self.events.publish(StatusEvent::completed(video_id, verdict));
                    return RunOutcome::Completed(verdict);
                }
            }
            Err(e) => logger.log_error(&format!("Could not record failure: {}", e)),
        }
        self.events.publish(StatusEvent::failed(video_id));
        RunOutcome::Failed
    }

    async fn stored_verdict(&self, video_id: &VideoId) -> Option<Verdict> {
        match self.store.find_by_id(video_id).await {
            Ok(Some(video)) if video.status == VideoStatus::Completed => {
                video.sensitivity_status.verdict()
            }
            _ => None,
        }
    }
}

/// Await `fut` unless the run is cancelled first.
async fn until_cancelled<F: Future>(
    cancel: &mut watch::Receiver<bool>,
    fut: F,
) -> PipelineResult<F::Output> {
    tokio::select! {
        biased;
        _ = cancelled(cancel) => Err(PipelineError::Cancelled),
        out = fut => Ok(out),
    }
}

async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return std::future::pending().await;
        }
    }
}

async fn discard_thumbnail(artifacts: &ArtifactStore, key: &str, logger: &RunLogger) {
    if let Err(e) = artifacts.delete(key).await {
        logger.log_warning(&format!("Could not remove thumbnail {}: {}", key, e));
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use safestream_firestore::{FirestoreResult, InMemoryVideoStore};
    use safestream_media::{MediaError, MediaResult, MockMediaInspector};
    use safestream_models::{EventStatus, SensitivityStatus, UserId, VideoQuery};
    use safestream_queue::InMemoryRegistry;
    use tokio::sync::{broadcast, Notify};

    use crate::classifier::MockClassifier;

    struct Harness {
        service: ProcessingService,
        store: Arc<InMemoryVideoStore>,
        registry: Arc<InMemoryRegistry>,
        events: broadcast::Receiver<StatusEvent>,
        _dir: tempfile::TempDir,
    }

    /// Classifier that never answers.
    struct StalledClassifier;

    #[async_trait]
    impl Classifier for StalledClassifier {
        async fn classify(&self, _video_id: &VideoId) -> PipelineResult<Verdict> {
            std::future::pending().await
        }
    }

    struct PanickingClassifier;

    #[async_trait]
    impl Classifier for PanickingClassifier {
        async fn classify(&self, _video_id: &VideoId) -> PipelineResult<Verdict> {
            panic!("model exploded")
        }
    }

    fn working_inspector() -> MockMediaInspector {
        let mut inspector = MockMediaInspector::new();
        inspector
            .expect_extract_thumbnail()
            .returning(|_source, dir, name| Ok(dir.join(name)));
        inspector
    }

    fn verdict(v: Verdict) -> MockClassifier {
        let mut classifier = MockClassifier::new();
        classifier.expect_classify().times(1).returning(move |_| Ok(v));
        classifier
    }

    async fn harness(
        config: PipelineConfig,
        inspector: Arc<dyn MediaInspector>,
        classifier: Arc<dyn Classifier>,
    ) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = ArtifactStore::new(dir.path()).await.unwrap();
        let store = Arc::new(InMemoryVideoStore::new());
        let registry = Arc::new(InMemoryRegistry::new());
        let broadcaster = EventBroadcaster::default();
        let events = broadcaster.subscribe();

        let service = ProcessingService::new(
            config,
            store.clone(),
            registry.clone(),
            broadcaster,
            artifacts,
        )
        .unwrap()
        .with_inspector(inspector)
        .with_classifier(classifier);

        Harness {
            service,
            store,
            registry,
            events,
            _dir: dir,
        }
    }

    async fn seed(store: &InMemoryVideoStore, id: &str, status: VideoStatus) -> VideoId {
        let mut video = Video::new(UserId::from("u1"), "Clip", "video-1.mp4", "clip.mp4", 10);
        video.id = VideoId::from(id);
        video.status = status;
        store.put(video).await;
        VideoId::from(id)
    }

    fn drain(rx: &mut broadcast::Receiver<StatusEvent>) -> Vec<StatusEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_run_event_sequence() {
        let mut h = harness(
            PipelineConfig::default(),
            Arc::new(working_inspector()),
            Arc::new(verdict(Verdict::Safe)),
        )
        .await;
        let id = seed(&h.store, "v1", VideoStatus::Pending).await;

        let outcome = h.service.start_processing(id.clone()).await.unwrap();
        assert_eq!(outcome, RunOutcome::Completed(Verdict::Safe));

        let events = drain(&mut h.events);
        let progress: Vec<u8> = events.iter().map(|e| e.progress).collect();
        assert_eq!(progress, vec![0, 10, 20, 30, 40, 50, 60, 70, 80, 90, 100, 100]);
        assert!(events[..11]
            .iter()
            .all(|e| e.status == EventStatus::Processing));
        assert_eq!(events[11], StatusEvent::completed(&id, Verdict::Safe));

        let video = h.store.find_by_id(&id).await.unwrap().unwrap();
        assert_eq!(video.status, VideoStatus::Completed);
        assert_eq!(video.sensitivity_status, SensitivityStatus::Safe);
        assert_eq!(video.thumbnail.as_deref(), Some("thumbnails/thumb-v1.png"));
        assert_eq!(h.registry.active_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_trigger_runs_once() {
        let mut h = harness(
            PipelineConfig::default(),
            Arc::new(working_inspector()),
            Arc::new(verdict(Verdict::Flagged)),
        )
        .await;
        let id = seed(&h.store, "v1", VideoStatus::Pending).await;

        let first = h.service.start_processing(id.clone());
        let second = h.service.start_processing(id.clone());
        let mut outcomes = vec![first.await.unwrap(), second.await.unwrap()];
        outcomes.sort_by_key(|o| o.label());

        assert_eq!(
            outcomes,
            vec![RunOutcome::Completed(Verdict::Flagged), RunOutcome::Duplicate]
        );
        assert_eq!(drain(&mut h.events).len(), 12);
    }

    /// Records every requested step and never waits.
    #[derive(Default)]
    struct RecordingProgress {
        seen: std::sync::Mutex<Vec<u8>>,
    }

    #[async_trait]
    impl ProgressSource for RecordingProgress {
        async fn advance(&self, next: u8) {
            self.seen.lock().unwrap().push(next);
        }
    }

    #[tokio::test]
    async fn test_custom_progress_source_paces_run() {
        let h = harness(
            PipelineConfig::default(),
            Arc::new(working_inspector()),
            Arc::new(verdict(Verdict::Safe)),
        )
        .await;
        let recorder = Arc::new(RecordingProgress::default());
        let service = h.service.clone().with_progress_source(recorder.clone());
        let id = seed(&h.store, "v1", VideoStatus::Pending).await;

        let outcome = service.start_processing(id).await.unwrap();
        assert_eq!(outcome, RunOutcome::Completed(Verdict::Safe));
        assert_eq!(
            *recorder.seen.lock().unwrap(),
            progress_steps().collect::<Vec<_>>()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_classifier_error_fails_run() {
        let mut classifier = MockClassifier::new();
        classifier
            .expect_classify()
            .times(1)
            .returning(|_| Err(PipelineError::classification("model offline")));

        let mut h = harness(
            PipelineConfig::default(),
            Arc::new(working_inspector()),
            Arc::new(classifier),
        )
        .await;
        let id = seed(&h.store, "v1", VideoStatus::Pending).await;

        assert_eq!(
            h.service.start_processing(id.clone()).await.unwrap(),
            RunOutcome::Failed
        );

        let events = drain(&mut h.events);
        let failed: Vec<_> = events
            .iter()
            .filter(|e| e.status == EventStatus::Failed)
            .collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(events.last(), Some(&StatusEvent::failed(&id)));

        let video = h.store.find_by_id(&id).await.unwrap().unwrap();
        assert_eq!(video.status, VideoStatus::Failed);
        assert_eq!(video.sensitivity_status, SensitivityStatus::Pending);
        assert_eq!(h.registry.active_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_thumbnail_failure_does_not_fail_run() {
        let mut inspector = MockMediaInspector::new();
        inspector
            .expect_extract_thumbnail()
            .returning(|source, _, _| Err(MediaError::FileNotFound(source.to_path_buf())));

        let h = harness(
            PipelineConfig::default(),
            Arc::new(inspector),
            Arc::new(verdict(Verdict::Safe)),
        )
        .await;
        let id = seed(&h.store, "v1", VideoStatus::Pending).await;

        assert_eq!(
            h.service.start_processing(id.clone()).await.unwrap(),
            RunOutcome::Completed(Verdict::Safe)
        );
        let video = h.store.find_by_id(&id).await.unwrap().unwrap();
        assert_eq!(video.status, VideoStatus::Completed);
        assert!(video.thumbnail.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_record_aborts_silently() {
        let mut classifier = MockClassifier::new();
        classifier.expect_classify().never();

        let mut h = harness(
            PipelineConfig::default(),
            Arc::new(MockMediaInspector::new()),
            Arc::new(classifier),
        )
        .await;

        let outcome = h
            .service
            .start_processing(VideoId::from("ghost"))
            .await
            .unwrap();
        assert_eq!(outcome, RunOutcome::Missing);
        assert!(drain(&mut h.events).is_empty());
        assert_eq!(h.registry.active_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_finished_video_is_not_reprocessed() {
        let mut h = harness(
            PipelineConfig::default(),
            Arc::new(MockMediaInspector::new()),
            Arc::new(MockClassifier::new()),
        )
        .await;
        let id = seed(&h.store, "v1", VideoStatus::Completed).await;

        assert_eq!(
            h.service.start_processing(id).await.unwrap(),
            RunOutcome::Skipped
        );
        assert!(drain(&mut h.events).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_after_delete_broadcasts_failed_without_write() {
        let mut h = harness(
            PipelineConfig::default(),
            Arc::new(working_inspector()),
            Arc::new(MockClassifier::new()),
        )
        .await;
        let id = seed(&h.store, "v1", VideoStatus::Pending).await;

        let handle = h.service.start_processing(id.clone());
        tokio::time::sleep(Duration::from_millis(3500)).await;

        assert!(h.service.is_active(&id).await.unwrap());
        h.store.delete(&id).await.unwrap();
        assert!(h.service.cancel_processing(&id).await);

        assert_eq!(handle.await.unwrap(), RunOutcome::Cancelled);

        let events = drain(&mut h.events);
        assert_eq!(events.last(), Some(&StatusEvent::failed(&id)));
        assert!(events.iter().all(|e| e.progress < 100));
        assert!(h.store.find_by_id(&id).await.unwrap().is_none());
        assert!(!h.service.is_active(&id).await.unwrap());
        assert!(!h.service.cancel_processing(&id).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_classifier_times_out() {
        let config = PipelineConfig {
            classifier_timeout: Duration::from_secs(5),
            ..Default::default()
        };
        let mut h = harness(
            config,
            Arc::new(working_inspector()),
            Arc::new(StalledClassifier),
        )
        .await;
        let id = seed(&h.store, "v1", VideoStatus::Pending).await;

        assert_eq!(
            h.service.start_processing(id.clone()).await.unwrap(),
            RunOutcome::Failed
        );
        assert_eq!(drain(&mut h.events).last(), Some(&StatusEvent::failed(&id)));
        let video = h.store.find_by_id(&id).await.unwrap().unwrap();
        assert_eq!(video.status, VideoStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_timeout_forces_failure() {
        let config = PipelineConfig {
            run_timeout: Duration::from_secs(4),
            ..Default::default()
        };
        let mut h = harness(
            config,
            Arc::new(working_inspector()),
            Arc::new(MockClassifier::new()),
        )
        .await;
        let id = seed(&h.store, "v1", VideoStatus::Pending).await;

        assert_eq!(
            h.service.start_processing(id.clone()).await.unwrap(),
            RunOutcome::Failed
        );

        let events = drain(&mut h.events);
        assert_eq!(events.last(), Some(&StatusEvent::failed(&id)));
        let video = h.store.find_by_id(&id).await.unwrap().unwrap();
        assert_eq!(video.status, VideoStatus::Failed);
        assert_eq!(h.registry.active_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panic_is_contained() {
        let mut h = harness(
            PipelineConfig::default(),
            Arc::new(working_inspector()),
            Arc::new(PanickingClassifier),
        )
        .await;
        let id = seed(&h.store, "v1", VideoStatus::Pending).await;

        assert_eq!(
            h.service.start_processing(id.clone()).await.unwrap(),
            RunOutcome::Failed
        );
        assert_eq!(drain(&mut h.events).last(), Some(&StatusEvent::failed(&id)));
        assert_eq!(h.registry.active_count().await, 0);
    }

    /// Writes the frame after `delay`, like a slow FFmpeg.
    struct SlowInspector {
        delay: Duration,
        written: Arc<Notify>,
    }

    #[async_trait]
    impl MediaInspector for SlowInspector {
        async fn extract_thumbnail(
            &self,
            _source: &Path,
            output_dir: &Path,
            output_name: &str,
        ) -> MediaResult<PathBuf> {
            tokio::time::sleep(self.delay).await;
            let path = output_dir.join(output_name);
            tokio::fs::write(&path, b"png").await?;
            self.written.notify_one();
            Ok(path)
        }
    }

    #[tokio::test]
    async fn test_delete_mid_run_stops_thumbnail() {
        let written = Arc::new(Notify::new());
        let inspector = SlowInspector {
            delay: Duration::from_millis(300),
            written: written.clone(),
        };
        let config = PipelineConfig {
            tick_interval: Duration::from_millis(100),
            ..Default::default()
        };
        let h = harness(config, Arc::new(inspector), Arc::new(MockClassifier::new())).await;
        let id = seed(&h.store, "v1", VideoStatus::Pending).await;

        let handle = h.service.start_processing(id.clone());
        tokio::time::sleep(Duration::from_millis(150)).await;

        h.store.delete(&id).await.unwrap();
        assert!(h.service.cancel_processing(&id).await);
        h.service
            .artifacts
            .delete_video_files(&id, "video-1.mp4", None)
            .await
            .unwrap();
        assert_eq!(handle.await.unwrap(), RunOutcome::Cancelled);

        tokio::time::sleep(Duration::from_millis(500)).await;
        let thumb = h.service.artifacts.resolve(&thumbnail_key(&id)).unwrap();
        assert!(!thumb.exists());
        assert!(
            tokio::time::timeout(Duration::from_millis(10), written.notified())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_thumbnail_for_deleted_record_is_removed() {
        let written = Arc::new(Notify::new());
        let inspector = SlowInspector {
            delay: Duration::from_millis(200),
            written: written.clone(),
        };
        let h = harness(
            PipelineConfig::default(),
            Arc::new(inspector),
            Arc::new(verdict(Verdict::Safe)),
        )
        .await;
        let service = h
            .service
            .clone()
            .with_progress_source(Arc::new(RecordingProgress::default()));
        let id = seed(&h.store, "v1", VideoStatus::Pending).await;

        assert_eq!(
            service.start_processing(id.clone()).await.unwrap(),
            RunOutcome::Completed(Verdict::Safe)
        );
        assert!(!service.is_active(&id).await.unwrap());

        // Extraction is still running when the record goes
        h.store.delete(&id).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), written.notified())
            .await
            .unwrap();

        let thumb = h.service.artifacts.resolve(&thumbnail_key(&id)).unwrap();
        let mut removed = false;
        for _ in 0..100 {
            if !thumb.exists() {
                removed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(removed, "thumbnail left at {}", thumb.display());
    }

    /// Applies the `completed` write at once but acknowledges it late.
    #[derive(Default)]
    struct SlowCompletionAck {
        inner: InMemoryVideoStore,
    }

    #[async_trait]
    impl VideoStore for SlowCompletionAck {
        async fn find_by_id(&self, id: &VideoId) -> FirestoreResult<Option<Video>> {
            self.inner.find_by_id(id).await
        }

        async fn create(&self, video: &Video) -> FirestoreResult<()> {
            self.inner.create(video).await
        }

        async fn update(&self, id: &VideoId, patch: &VideoPatch) -> FirestoreResult<()> {
            self.inner.update(id, patch).await?;
            if patch.status == Some(VideoStatus::Completed) {
                tokio::time::sleep(Duration::from_secs(300)).await;
            }
            Ok(())
        }

        async fn fail_unfinished(&self, id: &VideoId) -> FirestoreResult<bool> {
            self.inner.fail_unfinished(id).await
        }

        async fn delete(&self, id: &VideoId) -> FirestoreResult<()> {
            self.inner.delete(id).await
        }

        async fn find(&self, query: &VideoQuery) -> FirestoreResult<Vec<Video>> {
            self.inner.find(query).await
        }

        async fn find_stale_processing(
            &self,
            older_than: DateTime<Utc>,
        ) -> FirestoreResult<Vec<Video>> {
            self.inner.find_stale_processing(older_than).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_after_applied_completion_keeps_completed() {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = ArtifactStore::new(dir.path()).await.unwrap();
        let store = Arc::new(SlowCompletionAck::default());
        let broadcaster = EventBroadcaster::default();
        let mut events = broadcaster.subscribe();

        let service = ProcessingService::new(
            PipelineConfig::default(),
            store.clone(),
            Arc::new(InMemoryRegistry::new()),
            broadcaster,
            artifacts,
        )
        .unwrap()
        .with_inspector(Arc::new(working_inspector()))
        .with_classifier(Arc::new(verdict(Verdict::Safe)));
        let id = seed(&store.inner, "v1", VideoStatus::Pending).await;

        assert_eq!(
            service.start_processing(id.clone()).await.unwrap(),
            RunOutcome::Completed(Verdict::Safe)
        );

        let video = store.find_by_id(&id).await.unwrap().unwrap();
        assert_eq!(video.status, VideoStatus::Completed);
        assert_eq!(video.sensitivity_status, SensitivityStatus::Safe);

        let events = drain(&mut events);
        assert_eq!(events.last(), Some(&StatusEvent::completed(&id, Verdict::Safe)));
        assert!(events.iter().all(|e| e.status != EventStatus::Failed));
    }

    #[test]
    fn test_panic_message_extraction() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new(String::from("bang"))), "bang");
        assert_eq!(panic_message(Box::new(7u8)), "unknown panic");
    }
}
