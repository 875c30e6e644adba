//! # Primary Cache Stores
//!
//! The fast key-value tier. Redis in production, an in-memory map when Redis is
//! disabled and in tests.

pub mod memory;
pub mod redis_store;

pub use memory::InMemoryCache;
pub use redis_store::RedisCache;

use super::CacheResult;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use std::time::Duration;

/// A cached payload together with the time it was fetched upstream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Opaque payload bytes
    pub payload: Bytes,

    /// When the payload was fetched; `None` when the sidecar is missing or unreadable
    pub fetched_at: Option<DateTime<Utc>>,
}

impl CacheEntry {
    pub fn new(payload: Bytes, fetched_at: DateTime<Utc>) -> Self {
        Self {
            payload,
            fetched_at: Some(fetched_at),
        }
    }

    /// Age relative to `now`, if the fetch time is known
    pub fn age(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.fetched_at.map(|fetched| now - fetched)
    }
}

/// Encode a fetch time the way the sidecar stores it: base-10 unix seconds
pub fn encode_fetched_at(at: DateTime<Utc>) -> String {
    at.timestamp().to_string()
}

/// Decode a sidecar value; anything unparseable is treated as unknown
pub fn decode_fetched_at(raw: &[u8]) -> Option<DateTime<Utc>> {
    let text = std::str::from_utf8(raw).ok()?;
    let seconds: i64 = text.trim().parse().ok()?;
    Utc.timestamp_opt(seconds, 0).single()
}

/// Trait for primary cache implementations
#[async_trait]
pub trait PrimaryCache: Send + Sync {
    /// Get a raw value
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    /// Set a raw value; a zero TTL stores without expiry
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<()>;

    /// Delete a value, returning whether it existed
    async fn delete(&self, key: &str) -> CacheResult<bool>;

    /// Perform health check
    async fn health_check(&self) -> CacheResult<bool>;

    /// Name used in logs and metrics
    fn name(&self) -> &'static str;

    /// Read a value and its `:fetched_utc` sidecar.
    ///
    /// A missing value is `Ok(None)`. A missing or broken sidecar only clears
    /// `fetched_at`.
    async fn get_entry(&self, key: &str, fetched_at_key: &str) -> CacheResult<Option<CacheEntry>> {
        let Some(value) = self.get(key).await? else {
            return Ok(None);
        };

        let fetched_at = match self.get(fetched_at_key).await {
            Ok(Some(raw)) => decode_fetched_at(&raw),
            _ => None,
        };

        Ok(Some(CacheEntry {
            payload: Bytes::from(value),
            fetched_at,
        }))
    }

    /// Write a value and its sidecar with the same TTL
    async fn put_entry(
        &self,
        key: &str,
        fetched_at_key: &str,
        entry: &CacheEntry,
        ttl: Duration,
    ) -> CacheResult<()> {
        self.set(key, &entry.payload, ttl).await?;
        if let Some(fetched_at) = entry.fetched_at {
            self.set(fetched_at_key, encode_fetched_at(fetched_at).as_bytes(), ttl)
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetched_at_encoding() {
        let at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        assert_eq!(encode_fetched_at(at), "1700000000");
        assert_eq!(decode_fetched_at(b"1700000000"), Some(at));
        assert_eq!(decode_fetched_at(b" 1700000000\n"), Some(at));
        assert_eq!(decode_fetched_at(b"yesterday"), None);
        assert_eq!(decode_fetched_at(&[0xff, 0xfe]), None);
    }

    #[test]
    fn test_entry_age() {
        let fetched = Utc.timestamp_opt(1_000, 0).unwrap();
        let now = Utc.timestamp_opt(1_600, 0).unwrap();
        let entry = CacheEntry::new(Bytes::from_static(b"{}"), fetched);
        assert_eq!(entry.age(now), Some(chrono::Duration::seconds(600)));

        let unknown = CacheEntry {
            payload: Bytes::from_static(b"{}"),
            fetched_at: None,
        };
        assert_eq!(unknown.age(now), None);
    }
}
