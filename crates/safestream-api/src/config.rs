//! API configuration.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::bail;

/// Fallback signing secret, accepted only in development.
pub const DEV_JWT_SECRET: &str = "secret";

/// Where video and user records live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Firestore,
    /// Process memory; records vanish on restart
    Memory,
}

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    /// Sustained requests per second per client IP on `/api`
    pub rate_limit_rps: u32,
    pub rate_limit_burst: u32,
    /// Max request body size (uploads included)
    pub max_body_size: usize,
    /// Environment (development/production)
    pub environment: String,
    /// HS256 signing secret for bearer tokens
    pub jwt_secret: String,
    /// Root for originals and thumbnails
    pub upload_dir: PathBuf,
    pub store_backend: StoreBackend,
    /// Lifetime of cached list responses
    pub list_cache_ttl: Duration,
    pub metrics_enabled: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            cors_origins: vec!["*".to_string()],
            rate_limit_rps: 10,
            rate_limit_burst: 20,
            max_body_size: 512 * 1024 * 1024,
            environment: "development".to_string(),
            jwt_secret: DEV_JWT_SECRET.to_string(),
            upload_dir: PathBuf::from("uploads"),
            store_backend: StoreBackend::Firestore,
            list_cache_ttl: Duration::from_secs(60),
            metrics_enabled: true,
        }
    }
}

impl ApiConfig {
    /// Create config from environment variables.
    ///
    /// Fails when `JWT_SECRET` is missing outside development or a backend
    /// name is unknown.
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();
        let environment =
            std::env::var("ENVIRONMENT").unwrap_or_else(|_| defaults.environment.clone());

        let jwt_secret = match std::env::var("JWT_SECRET") {
            Ok(secret) if !secret.is_empty() => secret,
            _ if environment.eq_ignore_ascii_case("development") => DEV_JWT_SECRET.to_string(),
            _ => bail!("JWT_SECRET must be set when ENVIRONMENT={}", environment),
        };

        let store_backend = match std::env::var("STORE_BACKEND")
            .unwrap_or_else(|_| "firestore".to_string())
            .to_lowercase()
            .as_str()
        {
            "firestore" => StoreBackend::Firestore,
            "memory" => StoreBackend::Memory,
            other => bail!("Unknown STORE_BACKEND: {}", other),
        };

        Ok(Self {
            host: std::env::var("API_HOST").unwrap_or(defaults.host),
            port: env_parse("API_PORT", defaults.port),
            cors_origins: std::env::var("CORS_ORIGINS")
                .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or(defaults.cors_origins),
            rate_limit_rps: env_parse("RATE_LIMIT_RPS", defaults.rate_limit_rps),
            rate_limit_burst: env_parse("RATE_LIMIT_BURST", defaults.rate_limit_burst),
            max_body_size: env_parse("MAX_BODY_SIZE", defaults.max_body_size),
            environment,
            jwt_secret,
            upload_dir: std::env::var("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.upload_dir),
            store_backend,
            list_cache_ttl: Duration::from_secs(env_parse("LIST_CACHE_TTL_SECS", 60)),
            metrics_enabled: std::env::var("METRICS_ENABLED")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(true),
        })
    }

    /// Check if running in production mode.
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for key in [
            "ENVIRONMENT",
            "JWT_SECRET",
            "STORE_BACKEND",
            "API_PORT",
            "UPLOAD_DIR",
            "LIST_CACHE_TTL_SECS",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_development_defaults() {
        clear_env();
        let config = ApiConfig::from_env().unwrap();

        assert_eq!(config.port, 5000);
        assert_eq!(config.jwt_secret, DEV_JWT_SECRET);
        assert_eq!(config.store_backend, StoreBackend::Firestore);
        assert_eq!(config.upload_dir, PathBuf::from("uploads"));
        assert!(!config.is_production());
    }

    #[test]
    #[serial]
    fn test_production_requires_secret() {
        clear_env();
        std::env::set_var("ENVIRONMENT", "production");
        assert!(ApiConfig::from_env().is_err());

        std::env::set_var("JWT_SECRET", "s3cr3t");
        std::env::set_var("STORE_BACKEND", "memory");
        let config = ApiConfig::from_env().unwrap();
        clear_env();

        assert!(config.is_production());
        assert_eq!(config.jwt_secret, "s3cr3t");
        assert_eq!(config.store_backend, StoreBackend::Memory);
    }
}
