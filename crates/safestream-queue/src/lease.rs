//! Redis-backed run leases for multi-process deployments.
//!
//! A lease is `SET key token NX PX ttl`. Release deletes the key only while it
//! still holds our token, so an expired lease re-acquired elsewhere is left
//! alone. The TTL must exceed the longest run.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::Script;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use safestream_models::VideoId;

use crate::error::{QueueError, QueueResult};
use crate::registry::RunRegistry;

pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(300);

const RELEASE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
else
    return 0
end
"#;

fn lease_key(id: &VideoId) -> String {
    format!("safestream:run_lease:{}", id)
}

pub struct RedisLeaseRegistry {
    client: redis::Client,
    ttl: Duration,
    /// Tokens for leases held by this process
    held: Mutex<HashMap<VideoId, String>>,
}

impl RedisLeaseRegistry {
    pub fn new(redis_url: &str, ttl: Duration) -> QueueResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            client,
            ttl,
            held: Mutex::new(HashMap::new()),
        })
    }

    async fn connection(&self) -> QueueResult<MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(format!("Redis connection failed: {}", e)))
    }

    /// Round-trip to Redis.
    pub async fn ping(&self) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

#[async_trait]
impl RunRegistry for RedisLeaseRegistry {
    async fn try_acquire(&self, id: &VideoId) -> QueueResult<bool> {
        let mut conn = self.connection().await?;
        let token = format!("lease:{}", uuid::Uuid::new_v4());

        let result: Option<String> = redis::cmd("SET")
            .arg(lease_key(id))
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(self.ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await?;

        if result.is_none() {
            debug!(video_id = %id, "Run lease held elsewhere");
            return Ok(false);
        }

        self.held.lock().await.insert(id.clone(), token);
        Ok(true)
    }

    async fn release(&self, id: &VideoId) -> QueueResult<()> {
        let Some(token) = self.held.lock().await.remove(id) else {
            return Ok(());
        };

        let mut conn = self.connection().await?;
        let deleted: i32 = Script::new(RELEASE_SCRIPT)
            .key(lease_key(id))
            .arg(&token)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| QueueError::lease(format!("release failed: {}", e)))?;

        if deleted == 0 {
            warn!(video_id = %id, "Run lease expired before release");
        }
        Ok(())
    }

    async fn is_active(&self, id: &VideoId) -> QueueResult<bool> {
        let mut conn = self.connection().await?;
        let exists: bool = redis::cmd("EXISTS")
            .arg(lease_key(id))
            .query_async(&mut conn)
            .await?;
        Ok(exists)
    }
}
