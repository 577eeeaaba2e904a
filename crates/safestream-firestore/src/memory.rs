//! In-process store backend.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use safestream_models::{User, UserId, Video, VideoId, VideoPatch, VideoQuery, VideoStatus};

use crate::error::{FirestoreError, FirestoreResult};
use crate::store::{UserStore, VideoStore};

#[derive(Debug, Default)]
pub struct InMemoryVideoStore {
    videos: RwLock<HashMap<VideoId, Video>>,
}

impl InMemoryVideoStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.videos.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.videos.read().await.is_empty()
    }

    /// Insert or replace a record as-is, bypassing `create` checks.
    pub async fn put(&self, video: Video) {
        self.videos.write().await.insert(video.id.clone(), video);
    }
}

fn newest_first(mut videos: Vec<Video>) -> Vec<Video> {
    videos.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    videos
}

#[async_trait]
impl VideoStore for InMemoryVideoStore {
    async fn find_by_id(&self, id: &VideoId) -> FirestoreResult<Option<Video>> {
        Ok(self.videos.read().await.get(id).cloned())
    }

    async fn create(&self, video: &Video) -> FirestoreResult<()> {
        let mut videos = self.videos.write().await;
        if videos.contains_key(&video.id) {
            return Err(FirestoreError::AlreadyExists(format!("videos/{}", video.id)));
        }
        videos.insert(video.id.clone(), video.clone());
        Ok(())
    }

    async fn update(&self, id: &VideoId, patch: &VideoPatch) -> FirestoreResult<()> {
        let mut videos = self.videos.write().await;
        let video = videos
            .get_mut(id)
            .ok_or_else(|| FirestoreError::not_found(format!("videos/{}", id)))?;
        video.apply(patch);
        Ok(())
    }

    async fn fail_unfinished(&self, id: &VideoId) -> FirestoreResult<bool> {
        let mut videos = self.videos.write().await;
        let video = videos
            .get_mut(id)
            .ok_or_else(|| FirestoreError::not_found(format!("videos/{}", id)))?;
        if video.status.is_terminal() {
            return Ok(false);
        }
        video.apply(&VideoPatch::status(VideoStatus::Failed));
        Ok(true)
    }

    async fn delete(&self, id: &VideoId) -> FirestoreResult<()> {
        self.videos.write().await.remove(id);
        Ok(())
    }

    async fn find(&self, query: &VideoQuery) -> FirestoreResult<Vec<Video>> {
        let videos = self.videos.read().await;
        Ok(newest_first(
            videos.values().filter(|v| query.matches(v)).cloned().collect(),
        ))
    }

    async fn find_stale_processing(&self, older_than: DateTime<Utc>) -> FirestoreResult<Vec<Video>> {
        let stale = VideoQuery::new()
            .with_status(VideoStatus::Processing)
            .updated_before(older_than);
        let videos = self.videos.read().await;
        Ok(videos.values().filter(|v| stale.matches(v)).cloned().collect())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryUserStore {
    users: RwLock<HashMap<UserId, User>>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn find_by_id(&self, id: &UserId) -> FirestoreResult<Option<User>> {
        Ok(self.users.read().await.get(id).cloned())
    }

    async fn list(&self) -> FirestoreResult<Vec<User>> {
        let mut users: Vec<User> = self.users.read().await.values().cloned().collect();
        users.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(users)
    }

    async fn create(&self, user: &User) -> FirestoreResult<()> {
        let mut users = self.users.write().await;
        if users.contains_key(&user.id) {
            return Err(FirestoreError::AlreadyExists(format!("users/{}", user.id)));
        }
        users.insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn delete(&self, id: &UserId) -> FirestoreResult<()> {
        self.users.write().await.remove(id);
        Ok(())
    }
}
