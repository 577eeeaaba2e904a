//! Persistence seams used by the pipeline and the API.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use safestream_models::{User, UserId, Video, VideoId, VideoPatch, VideoQuery};

use crate::error::FirestoreResult;

/// Video records.
#[cfg_attr(any(test, feature = "test-support"), mockall::automock)]
#[async_trait]
pub trait VideoStore: Send + Sync {
    async fn find_by_id(&self, id: &VideoId) -> FirestoreResult<Option<Video>>;

    async fn create(&self, video: &Video) -> FirestoreResult<()>;

    /// Apply `patch` plus a fresh `updatedAt`.
    ///
    /// Fails with `NotFound` if the record does not exist.
    async fn update(&self, id: &VideoId, patch: &VideoPatch) -> FirestoreResult<()>;

    /// Set `failed` unless the record already reached a terminal status.
    ///
    /// Returns `false` when the record was left untouched. Fails with
    /// `NotFound` if the record does not exist.
    async fn fail_unfinished(&self, id: &VideoId) -> FirestoreResult<bool>;

    /// Remove a record. Removing a missing record succeeds.
    async fn delete(&self, id: &VideoId) -> FirestoreResult<()>;

    /// Matching records, newest first.
    async fn find(&self, query: &VideoQuery) -> FirestoreResult<Vec<Video>>;

    /// Records still `processing` and untouched since `older_than`.
    async fn find_stale_processing(&self, older_than: DateTime<Utc>) -> FirestoreResult<Vec<Video>>;
}

/// User records.
#[cfg_attr(any(test, feature = "test-support"), mockall::automock)]
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_id(&self, id: &UserId) -> FirestoreResult<Option<User>>;

    async fn list(&self) -> FirestoreResult<Vec<User>>;

    async fn create(&self, user: &User) -> FirestoreResult<()>;

    async fn delete(&self, id: &UserId) -> FirestoreResult<()>;
}
