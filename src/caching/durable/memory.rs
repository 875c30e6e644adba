//! In-memory object store for development and tests.

use super::{ObjectMetadata, ObjectStore, StoredObject};
use crate::caching::CacheResult;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct InMemoryObjectStore {
    objects: Arc<DashMap<String, StoredObject>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Sorted object names under `prefix`
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .objects
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put_object(
        &self,
        key: &str,
        body: Bytes,
        content_type: &str,
        metadata: &ObjectMetadata,
    ) -> CacheResult<()> {
        self.objects.insert(
            key.to_string(),
            StoredObject {
                body,
                content_type: Some(content_type.to_string()),
                metadata: metadata.clone(),
            },
        );
        Ok(())
    }

    async fn get_object(&self, key: &str) -> CacheResult<Option<StoredObject>> {
        Ok(self.objects.get(key).map(|object| object.clone()))
    }

    async fn head_object(&self, key: &str) -> CacheResult<Option<ObjectMetadata>> {
        Ok(self.objects.get(key).map(|object| object.metadata.clone()))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
