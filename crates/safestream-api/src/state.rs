//! Application state.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use safestream_firestore::{
    FirestoreClient, FirestoreUserStore, FirestoreVideoStore, InMemoryUserStore,
    InMemoryVideoStore, UserStore, VideoStore,
};
use safestream_queue::{EventBroadcaster, RunRegistry};
use safestream_storage::ArtifactStore;
use safestream_worker::{PipelineConfig, ProcessingService};

use crate::auth::JwtKeys;
use crate::cache::ResponseCache;
use crate::config::{ApiConfig, StoreBackend};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub videos: Arc<dyn VideoStore>,
    pub users: Arc<dyn UserStore>,
    pub artifacts: ArtifactStore,
    pub registry: Arc<dyn RunRegistry>,
    pub events: EventBroadcaster,
    pub processing: ProcessingService,
    pub cache: Arc<ResponseCache>,
    pub jwt: Arc<JwtKeys>,
}

impl AppState {
    /// Build state with the configured store and registry backends.
    pub async fn new(config: ApiConfig, pipeline: PipelineConfig) -> anyhow::Result<Self> {
        let (videos, users): (Arc<dyn VideoStore>, Arc<dyn UserStore>) = match config.store_backend
        {
            StoreBackend::Firestore => {
                let client = FirestoreClient::from_env()
                    .await
                    .context("Failed to create Firestore client")?;
                (
                    Arc::new(FirestoreVideoStore::new(client.clone())),
                    Arc::new(FirestoreUserStore::new(client)),
                )
            }
            StoreBackend::Memory => {
                info!("Using in-memory store; records are lost on restart");
                (
                    Arc::new(InMemoryVideoStore::new()),
                    Arc::new(InMemoryUserStore::new()),
                )
            }
        };

        let registry = pipeline
            .registry
            .build()
            .await
            .context("Failed to create run registry")?;

        Self::with_stores(config, pipeline, videos, users, registry).await
    }

    /// Build state around existing stores.
    pub async fn with_stores(
        config: ApiConfig,
        pipeline: PipelineConfig,
        videos: Arc<dyn VideoStore>,
        users: Arc<dyn UserStore>,
        registry: Arc<dyn RunRegistry>,
    ) -> anyhow::Result<Self> {
        let artifacts = ArtifactStore::new(&config.upload_dir)
            .await
            .context("Failed to open upload directory")?;
        let events = EventBroadcaster::default();

        let processing = ProcessingService::new(
            pipeline,
            Arc::clone(&videos),
            Arc::clone(&registry),
            events.clone(),
            artifacts.clone(),
        )?;

        let cache = Arc::new(ResponseCache::new(config.list_cache_ttl));
        let jwt = Arc::new(JwtKeys::new(&config.jwt_secret));

        Ok(Self {
            config,
            videos,
            users,
            artifacts,
            registry,
            events,
            processing,
            cache,
            jwt,
        })
    }
}
