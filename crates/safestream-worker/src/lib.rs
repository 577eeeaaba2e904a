//! Video processing pipeline.
//!
//! This crate provides:
//! - The per-video run state machine ([`ProcessingService`])
//! - The classifier seam and its placeholder implementation
//! - Progress pacing
//! - Reconciliation of runs interrupted by a restart

pub mod classifier;
pub mod config;
pub mod error;
pub mod logging;
pub mod processor;
pub mod progress;
pub mod reconcile;

pub use classifier::{Classifier, RandomClassifier};
pub use config::{PipelineConfig, RegistryBackend};
pub use error::{PipelineError, PipelineResult};
pub use logging::RunLogger;
pub use processor::{ProcessingService, RunOutcome};
pub use progress::{ProgressSource, TickingProgress, PROGRESS_STEP};
pub use reconcile::ReconciliationSweep;

#[cfg(any(test, feature = "test-support"))]
pub use classifier::MockClassifier;
