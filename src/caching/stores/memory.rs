//! # In-Memory Cache Store
//!
//! Process-local primary cache with TTL expiry. Used when Redis is disabled and as
//! the primary tier in tests.

use super::PrimaryCache;
use crate::caching::CacheResult;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, Instant};
use tracing::debug;

#[derive(Debug, Clone)]
struct StoredValue {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map_or(false, |at| now >= at)
    }
}

/// In-memory cache implementation
#[derive(Debug, Clone, Default)]
pub struct InMemoryCache {
    entries: Arc<DashMap<String, StoredValue>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a task that drops expired entries every `every`
    pub fn spawn_cleanup(&self, every: Duration) -> tokio::task::JoinHandle<()> {
        let entries = self.entries.clone();
        tokio::spawn(async move {
            let mut ticker = interval(every);
            loop {
                ticker.tick().await;
                let removed = Self::cleanup_expired_entries(&entries);
                if removed > 0 {
                    debug!(removed, "cleaned up expired in-memory cache entries");
                }
            }
        })
    }

    fn cleanup_expired_entries(entries: &DashMap<String, StoredValue>) -> usize {
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, stored| !stored.is_expired(now));
        before.saturating_sub(entries.len())
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|e| !e.is_expired(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl PrimaryCache for InMemoryCache {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let now = Instant::now();
        let hit = match self.entries.get(key) {
            Some(stored) if !stored.is_expired(now) => Some(stored.value.clone()),
            Some(_) => None,
            None => return Ok(None),
        };

        if hit.is_none() {
            self.entries.remove_if(key, |_, stored| stored.is_expired(now));
        }
        Ok(hit)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<()> {
        let expires_at = (!ttl.is_zero()).then(|| Instant::now() + ttl);
        self.entries.insert(
            key.to_string(),
            StoredValue {
                value: value.to_vec(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn health_check(&self) -> CacheResult<bool> {
        Ok(true)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
