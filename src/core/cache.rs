//! Short-lived memoization for read queries.
//!
//! Entries are keyed by `namespace:sha256(params)` and carry invalidation
//! tags. Mutating handlers call [`QueryCache::invalidate_tag`] once their
//! transaction commits.

use log::debug;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::core::shared::error::ApiError;

pub const TAG_TICKETS: &str = "tickets";
pub const TAG_TEAMS: &str = "teams";
pub const TAG_USERS: &str = "users";
pub const TAG_MARKETPLACE: &str = "marketplace";
pub const TAG_AUDIT: &str = "audit";

pub fn messages_tag(ticket_id: uuid::Uuid) -> String {
    format!("messages:{ticket_id}")
}

struct CacheEntry {
    value: Value,
    tags: Vec<String>,
    expires_at: Instant,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

pub struct QueryCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl QueryCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn cache_key<P: Serialize + ?Sized>(namespace: &str, params: &P) -> String {
        let serialized = serde_json::to_vec(params).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(&serialized);
        format!("{}:{}", namespace, hex::encode(hasher.finalize()))
    }

    /// Returns the cached value for `(namespace, params)` or runs `loader` and
    /// stores its result. Loader errors are returned as-is and never cached.
    pub async fn get_or_load<P, T, F, Fut>(
        &self,
        namespace: &str,
        params: &P,
        tags: &[&str],
        loader: F,
    ) -> Result<T, ApiError>
    where
        P: Serialize + ?Sized,
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let key = Self::cache_key(namespace, params);

        if self.ttl.is_zero() {
            return loader().await;
        }

        {
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(&key) {
                if entry.expires_at > Instant::now() {
                    if let Ok(value) = serde_json::from_value::<T>(entry.value.clone()) {
                        self.hits.fetch_add(1, Ordering::Relaxed);
                        return Ok(value);
                    }
                }
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let value = loader().await?;

        match serde_json::to_value(&value) {
            Ok(serialized) => {
                let now = Instant::now();
                let mut entries = self.entries.write().await;
                entries.retain(|_, e| e.expires_at > now);
                entries.insert(
                    key,
                    CacheEntry {
                        value: serialized,
                        tags: tags.iter().map(|t| t.to_string()).collect(),
                        expires_at: now + self.ttl,
                    },
                );
            }
            Err(e) => debug!("Skipping cache for {namespace}: {e}"),
        }

        Ok(value)
    }

    pub async fn invalidate_tag(&self, tag: &str) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| !e.tags.iter().any(|t| t == tag));
        let removed = before - entries.len();
        if removed > 0 {
            debug!("Invalidated {removed} cached queries tagged {tag}");
        }
        removed
    }

    pub async fn invalidate_tags(&self, tags: &[&str]) {
        for tag in tags {
            self.invalidate_tag(tag).await;
        }
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.read().await.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}
