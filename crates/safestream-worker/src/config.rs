//! Pipeline configuration.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use safestream_queue::{InMemoryRegistry, RedisLeaseRegistry, RunRegistry};

use crate::error::{PipelineError, PipelineResult};

/// Minimum period between reconciliation sweeps.
pub const MIN_RECONCILE_INTERVAL: Duration = Duration::from_secs(30);

/// Where active-run markers live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryBackend {
    /// Process-local set
    Memory,
    /// Redis leases, for several API processes sharing one store
    Redis { url: String, lease_ttl: Duration },
}

impl RegistryBackend {
    /// Build the registry. A Redis backend must answer a ping.
    pub async fn build(&self) -> PipelineResult<Arc<dyn RunRegistry>> {
        match self {
            RegistryBackend::Memory => Ok(Arc::new(InMemoryRegistry::new())),
            RegistryBackend::Redis { url, lease_ttl } => {
                let registry = RedisLeaseRegistry::new(url, *lease_ttl)?;
                registry.ping().await?;
                info!("Using Redis run registry (lease ttl: {:?})", lease_ttl);
                Ok(Arc::new(registry))
            }
        }
    }
}

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Delay between progress ticks
    pub tick_interval: Duration,
    /// Hard limit for one run, from acquire to release
    pub run_timeout: Duration,
    /// Limit for a single classifier call
    pub classifier_timeout: Duration,
    /// Share of `safe` verdicts from the placeholder classifier
    pub safe_ratio: f64,
    pub reconcile_enabled: bool,
    /// Age after which a `processing` record with no local run is stale
    pub reconcile_grace: Duration,
    pub registry: RegistryBackend,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(1000),
            run_timeout: Duration::from_secs(120),
            classifier_timeout: Duration::from_secs(30),
            safe_ratio: 0.7,
            reconcile_enabled: true,
            reconcile_grace: Duration::from_secs(600),
            registry: RegistryBackend::Memory,
        }
    }
}

impl PipelineConfig {
    /// Create config from environment variables.
    pub fn from_env() -> PipelineResult<Self> {
        let defaults = Self::default();

        let registry = match std::env::var("REGISTRY_BACKEND")
            .unwrap_or_else(|_| "memory".to_string())
            .to_lowercase()
            .as_str()
        {
            "memory" => RegistryBackend::Memory,
            "redis" => RegistryBackend::Redis {
                url: std::env::var("REDIS_URL")
                    .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
                lease_ttl: Duration::from_secs(env_parse("REGISTRY_LEASE_TTL_SECS", 300)),
            },
            other => {
                return Err(PipelineError::config_error(format!(
                    "Unknown REGISTRY_BACKEND: {}",
                    other
                )))
            }
        };

        Ok(Self {
            tick_interval: Duration::from_millis(env_parse("PROCESSING_TICK_MS", 1000)),
            run_timeout: Duration::from_secs(env_parse("PROCESSING_RUN_TIMEOUT_SECS", 120)),
            classifier_timeout: Duration::from_secs(env_parse("CLASSIFIER_TIMEOUT_SECS", 30)),
            safe_ratio: env_parse("CLASSIFIER_SAFE_RATIO", defaults.safe_ratio).clamp(0.0, 1.0),
            reconcile_enabled: std::env::var("RECONCILE_ENABLED")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(true),
            reconcile_grace: Duration::from_secs(env_parse("RECONCILE_GRACE_SECS", 600)),
            registry,
        })
    }

    /// Sweep period: half the grace window, never below 30 seconds.
    pub fn reconcile_interval(&self) -> Duration {
        (self.reconcile_grace / 2).max(MIN_RECONCILE_INTERVAL)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
