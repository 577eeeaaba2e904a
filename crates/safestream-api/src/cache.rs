//! Short-lived cache for unfiltered list responses.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::RwLock;

/// TTL cache keyed by actor and path. Any write to the video set clears it.
#[derive(Debug)]
pub struct ResponseCache {
    entries: RwLock<HashMap<String, (Instant, Value)>>,
    ttl: Duration,
}

impl ResponseCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn key(actor: &str, path: &str) -> String {
        format!("{}:{}", actor, path)
    }

    /// Fresh entry for `key`. Expired entries are dropped on read.
    pub async fn get(&self, key: &str) -> Option<Value> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some((stored_at, value)) if stored_at.elapsed() < self.ttl => {
                    return Some(value.clone())
                }
                Some(_) => {}
                None => return None,
            }
        }

        self.entries.write().await.remove(key);
        None
    }

    pub async fn put(&self, key: String, value: Value) {
        if self.ttl.is_zero() {
            return;
        }
        self.entries.write().await.insert(key, (Instant::now(), value));
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}
