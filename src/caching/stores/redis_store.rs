//! # Redis Cache Store
//!
//! Redis-backed primary cache. The connection is established lazily so that an
//! unreachable Redis at startup degrades the tier instead of stopping the process;
//! every call is bounded by the configured operation timeout.

use super::{decode_fetched_at, encode_fetched_at, CacheEntry, PrimaryCache};
use crate::caching::{with_timeout, CacheError, CacheResult};
use crate::core::config::RedisConfig;
use async_trait::async_trait;
use bytes::Bytes;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, IntoConnectionInfo};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Redis cache implementation
pub struct RedisCache {
    client: Client,
    connection: OnceCell<ConnectionManager>,
    key_prefix: String,
    operation_timeout: Duration,
}

impl RedisCache {
    /// Create a Redis cache. Only the URL is checked here; no connection is made.
    pub fn new(config: &RedisConfig) -> CacheResult<Self> {
        let mut info = config
            .url
            .as_str()
            .into_connection_info()
            .map_err(|e| CacheError::config(format!("Invalid Redis URL: {}", e)))?;

        if let Some(password) = &config.password {
            info.redis.password = Some(password.clone());
        }

        let client = Client::open(info)?;

        Ok(Self {
            client,
            connection: OnceCell::new(),
            key_prefix: config.key_prefix.clone(),
            operation_timeout: config.operation_timeout,
        })
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    /// Shared connection, connecting on first use. A failed attempt leaves the cell
    /// empty so the next call tries again.
    async fn connection(&self) -> CacheResult<ConnectionManager> {
        let manager = self
            .connection
            .get_or_try_init(|| async {
                let manager = with_timeout(self.operation_timeout, async {
                    Ok(ConnectionManager::new(self.client.clone()).await?)
                })
                .await?;
                info!("Redis primary cache connected");
                Ok::<_, CacheError>(manager)
            })
            .await?;

        Ok(manager.clone())
    }
}

#[async_trait]
impl PrimaryCache for RedisCache {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let full_key = self.full_key(key);
        with_timeout(self.operation_timeout, async {
            let mut conn = self.connection().await?;
            let value: Option<Vec<u8>> = conn.get(&full_key).await?;
            debug!(key, hit = value.is_some(), "redis get");
            Ok(value)
        })
        .await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<()> {
        let full_key = self.full_key(key);
        with_timeout(self.operation_timeout, async {
            let mut conn = self.connection().await?;
            if ttl.as_secs() == 0 {
                conn.set::<_, _, ()>(&full_key, value).await?;
            } else {
                conn.set_ex::<_, _, ()>(&full_key, value, ttl.as_secs()).await?;
            }
            Ok(())
        })
        .await
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let full_key = self.full_key(key);
        with_timeout(self.operation_timeout, async {
            let mut conn = self.connection().await?;
            let deleted: i64 = conn.del(&full_key).await?;
            Ok(deleted > 0)
        })
        .await
    }

    async fn health_check(&self) -> CacheResult<bool> {
        let result = with_timeout(self.operation_timeout, async {
            let mut conn = self.connection().await?;
            let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
            Ok(pong)
        })
        .await;

        match result {
            Ok(response) => Ok(response == "PONG"),
            Err(e) => {
                warn!(error = %e, "redis health check failed");
                Ok(false)
            }
        }
    }

    fn name(&self) -> &'static str {
        "redis"
    }

    /// Value and sidecar in one round trip
    async fn get_entry(&self, key: &str, fetched_at_key: &str) -> CacheResult<Option<CacheEntry>> {
        let keys = vec![self.full_key(key), self.full_key(fetched_at_key)];
        with_timeout(self.operation_timeout, async {
            let mut conn = self.connection().await?;
            let (value, fetched_at): (Option<Vec<u8>>, Option<Vec<u8>>) =
                redis::cmd("MGET").arg(&keys).query_async(&mut conn).await?;

            Ok(value.map(|payload| CacheEntry {
                payload: Bytes::from(payload),
                fetched_at: fetched_at.as_deref().and_then(decode_fetched_at),
            }))
        })
        .await
    }

    /// Value and sidecar written atomically
    async fn put_entry(
        &self,
        key: &str,
        fetched_at_key: &str,
        entry: &CacheEntry,
        ttl: Duration,
    ) -> CacheResult<()> {
        let value_key = self.full_key(key);
        let sidecar_key = self.full_key(fetched_at_key);
        let seconds = ttl.as_secs().max(1);

        with_timeout(self.operation_timeout, async {
            let mut conn = self.connection().await?;
            let mut pipe = redis::pipe();
            pipe.atomic()
                .set_ex(&value_key, entry.payload.as_ref(), seconds)
                .ignore();
            if let Some(fetched_at) = entry.fetched_at {
                pipe.set_ex(&sidecar_key, encode_fetched_at(fetched_at), seconds)
                    .ignore();
            }
            pipe.query_async::<_, ()>(&mut conn).await?;
            Ok(())
        })
        .await
    }
}
