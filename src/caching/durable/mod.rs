//! # Durable Versioned Store
//!
//! Content-addressed fallback tier on top of an object store. Every origin fetch is
//! written twice with the same bytes and metadata:
//! 1. an immutable version object `<prefix>/<YYYYMMDDThhmmssZ>_<sha256>.json`
//! 2. the mutable pointer `<prefix>/latest.json`
//!
//! The version is written first. Version objects are append-only, so a pointer
//! write that fails afterwards is not rolled back: the pointer lags until the next
//! successful fetch.

pub mod memory;
pub mod s3;

pub use memory::InMemoryObjectStore;
pub use s3::S3ObjectStore;

use super::key_generator::CacheKey;
use super::{with_timeout, CacheError, CacheResult};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, NaiveDateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Timestamp format used in version names and `created_utc` metadata
pub const VERSION_TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%SZ";

pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Metadata field names
pub mod meta {
    pub const APP: &str = "app";
    pub const LANG: &str = "lang";
    pub const SHA256: &str = "sha256";
    pub const CREATED_UTC: &str = "created_utc";
    pub const SOURCE: &str = "source";
    pub const ENDPOINT: &str = "endpoint";
}

/// User metadata attached to an object
pub type ObjectMetadata = BTreeMap<String, String>;

/// An object body with its metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub body: Bytes,
    pub content_type: Option<String>,
    pub metadata: ObjectMetadata,
}

/// Minimal object store used by the durable tier
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write (or overwrite) an object
    async fn put_object(
        &self,
        key: &str,
        body: Bytes,
        content_type: &str,
        metadata: &ObjectMetadata,
    ) -> CacheResult<()>;

    /// Read an object; `Ok(None)` when it does not exist
    async fn get_object(&self, key: &str) -> CacheResult<Option<StoredObject>>;

    /// Read only the metadata of an object
    async fn head_object(&self, key: &str) -> CacheResult<Option<ObjectMetadata>>;

    /// Name used in logs and metrics
    fn name(&self) -> &'static str;
}

/// Payload read from a latest pointer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatestObject {
    pub payload: Bytes,
    pub created_at: Option<DateTime<Utc>>,
    pub sha256: Option<String>,
}

/// Names written by one [`VersionedStore::put_version`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRecord {
    pub version_path: String,
    pub latest_path: String,
    pub sha256: String,
    pub created_at: DateTime<Utc>,
}

/// Versioned store over any [`ObjectStore`]
#[derive(Clone)]
pub struct VersionedStore {
    store: Arc<dyn ObjectStore>,
    operation_timeout: Duration,
    source: String,
}

impl VersionedStore {
    pub fn new(store: Arc<dyn ObjectStore>, operation_timeout: Duration) -> Self {
        Self {
            store,
            operation_timeout,
            source: "tolgee".to_string(),
        }
    }

    pub fn backend(&self) -> &'static str {
        self.store.name()
    }

    /// Download the latest pointer. Failures are logged and read as "absent".
    pub async fn get_latest(&self, key: &CacheKey) -> Option<LatestObject> {
        match self.try_get_latest(key).await {
            Ok(found) => found,
            Err(e) => {
                warn!(key = %key, backend = self.backend(), error = %e, "durable latest read failed");
                None
            }
        }
    }

    pub async fn try_get_latest(&self, key: &CacheKey) -> CacheResult<Option<LatestObject>> {
        let path = key.durable_latest_path();
        let object = with_timeout(self.operation_timeout, self.store.get_object(&path)).await?;

        Ok(object.map(|object| {
            debug!(key = %key, path = %path, bytes = object.body.len(), "durable latest hit");
            LatestObject {
                created_at: created_at_from(&object.metadata),
                sha256: object.metadata.get(meta::SHA256).cloned(),
                payload: object.body,
            }
        }))
    }

    /// Creation time of the latest pointer without downloading its body
    pub async fn head_latest_created_at(&self, key: &CacheKey) -> Option<DateTime<Utc>> {
        let path = key.durable_latest_path();
        match with_timeout(self.operation_timeout, self.store.head_object(&path)).await {
            Ok(metadata) => metadata.as_ref().and_then(created_at_from),
            Err(e) => {
                warn!(key = %key, error = %e, "durable latest head failed");
                None
            }
        }
    }

    /// Write a new version object and point `latest.json` at the same bytes
    pub async fn put_version(&self, key: &CacheKey, payload: Bytes) -> CacheResult<VersionRecord> {
        self.put_version_at(key, payload, Utc::now()).await
    }

    pub async fn put_version_at(
        &self,
        key: &CacheKey,
        payload: Bytes,
        now: DateTime<Utc>,
    ) -> CacheResult<VersionRecord> {
        let sha256 = sha256_hex(&payload);
        let timestamp = now.format(VERSION_TIMESTAMP_FORMAT).to_string();
        let version_path = key.durable_version_path(&timestamp, &sha256);
        let latest_path = key.durable_latest_path();
        let metadata = self.metadata_for(key, &sha256, &timestamp);

        // Same second and same content resolve to the same name; leave it alone.
        let exists = matches!(
            with_timeout(self.operation_timeout, self.store.head_object(&version_path)).await,
            Ok(Some(_))
        );
        if !exists {
            with_timeout(
                self.operation_timeout,
                self.store
                    .put_object(&version_path, payload.clone(), CONTENT_TYPE_JSON, &metadata),
            )
            .await?;
        }

        with_timeout(
            self.operation_timeout,
            self.store
                .put_object(&latest_path, payload, CONTENT_TYPE_JSON, &metadata),
        )
        .await
        .map_err(|e| {
            CacheError::store(format!(
                "version {} written but latest pointer update failed: {}",
                version_path, e
            ))
        })?;

        debug!(key = %key, version = %version_path, "durable version written");

        Ok(VersionRecord {
            version_path,
            latest_path,
            sha256,
            created_at: now,
        })
    }

    fn metadata_for(&self, key: &CacheKey, sha256: &str, timestamp: &str) -> ObjectMetadata {
        let mut metadata = ObjectMetadata::new();
        metadata.insert(meta::APP.to_string(), key.app_id().to_string());
        match key.lang() {
            Some(lang) => {
                metadata.insert(meta::LANG.to_string(), lang.to_string());
            }
            None => {
                metadata.insert(meta::ENDPOINT.to_string(), key.kind().to_string());
            }
        }
        metadata.insert(meta::SHA256.to_string(), sha256.to_string());
        metadata.insert(meta::CREATED_UTC.to_string(), timestamp.to_string());
        metadata.insert(meta::SOURCE.to_string(), self.source.clone());
        metadata
    }
}

pub fn sha256_hex(payload: &[u8]) -> String {
    hex::encode(Sha256::digest(payload))
}

fn created_at_from(metadata: &ObjectMetadata) -> Option<DateTime<Utc>> {
    let raw = metadata.get(meta::CREATED_UTC)?;
    NaiveDateTime::parse_from_str(raw, VERSION_TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}
