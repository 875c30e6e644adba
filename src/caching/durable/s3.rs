//! # S3 Object Store
//!
//! S3-compatible object storage through the AWS SDK. Supports path-style
//! addressing (MinIO, Ceph and most self-hosted gateways) and virtual-hosted
//! addressing (AWS), static or temporary credentials, and the SDK's standard
//! retry policy.

use super::{ObjectMetadata, ObjectStore, StoredObject};
use crate::caching::{CacheError, CacheResult};
use crate::core::config::S3Config;
use async_trait::async_trait;
use aws_sdk_s3::config::retry::RetryConfig;
use aws_sdk_s3::config::timeout::TimeoutConfig;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::ObjectCannedAcl;
use aws_sdk_s3::Client;
use bytes::Bytes;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// First retry delay; later ones back off exponentially with jitter
const RETRY_INITIAL_BACKOFF: Duration = Duration::from_millis(100);

const CREDENTIALS_PROVIDER: &str = "localization-cache";

/// S3-compatible object store client
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
}

impl S3ObjectStore {
    /// Build a client from configuration. Missing bucket, endpoint or credentials
    /// are a configuration error.
    pub fn new(config: &S3Config) -> CacheResult<Self> {
        config
            .validate()
            .map_err(|e| CacheError::config(e.to_string()))?;

        let credentials = Credentials::new(
            config.access_key.trim(),
            config.secret_key.trim(),
            config.session_token(),
            None,
            CREDENTIALS_PROVIDER,
        );

        let sdk_config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .endpoint_url(config.endpoint_url())
            .credentials_provider(credentials)
            .force_path_style(config.force_path_style)
            .retry_config(
                RetryConfig::standard()
                    .with_max_attempts(config.max_attempts)
                    .with_initial_backoff(RETRY_INITIAL_BACKOFF),
            )
            .timeout_config(
                TimeoutConfig::builder()
                    .operation_timeout(config.operation_timeout)
                    .build(),
            )
            .build();

        Ok(Self {
            client: Client::from_conf(sdk_config),
            bucket: config.bucket.clone(),
        })
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put_object(
        &self,
        key: &str,
        body: Bytes,
        content_type: &str,
        metadata: &ObjectMetadata,
    ) -> CacheResult<()> {
        let metadata: HashMap<String, String> = metadata
            .iter()
            .map(|(name, value)| (name.to_lowercase(), value.clone()))
            .collect();

        debug!(key, bytes = body.len(), "s3 put");
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .acl(ObjectCannedAcl::Private)
            .set_metadata(Some(metadata))
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| sdk_error("PUT", key, e))?;
        Ok(())
    }

    async fn get_object(&self, key: &str) -> CacheResult<Option<StoredObject>> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        let output = match result {
            Ok(output) => output,
            Err(e) if is_missing(&e, |err| err.is_no_such_key()) => return Ok(None),
            Err(e) => return Err(sdk_error("GET", key, e)),
        };

        let metadata = metadata_from(output.metadata());
        let content_type = output.content_type().map(str::to_string);
        let body = output
            .body
            .collect()
            .await
            .map_err(|e| CacheError::store(format!("S3 GET {} body: {}", key, e)))?
            .into_bytes();

        debug!(key, bytes = body.len(), "s3 get");
        Ok(Some(StoredObject {
            body,
            content_type,
            metadata,
        }))
    }

    async fn head_object(&self, key: &str) -> CacheResult<Option<ObjectMetadata>> {
        let result = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match result {
            Ok(output) => Ok(Some(metadata_from(output.metadata()))),
            Err(e) if is_missing(&e, |err| err.is_not_found()) => Ok(None),
            Err(e) => Err(sdk_error("HEAD", key, e)),
        }
    }

    fn name(&self) -> &'static str {
        "s3"
    }
}

/// A missing object is either the modelled "not found" error or a bare 404
fn is_missing<E>(err: &SdkError<E>, modelled: impl Fn(&E) -> bool) -> bool {
    err.as_service_error().map(modelled).unwrap_or(false) || status_of(err) == Some(404)
}

fn status_of<E>(err: &SdkError<E>) -> Option<u16> {
    err.raw_response().map(|response| response.status().as_u16())
}

fn sdk_error<E>(operation: &str, key: &str, err: SdkError<E>) -> CacheError
where
    E: std::error::Error + Send + Sync + 'static,
{
    match &err {
        SdkError::TimeoutError(_) => return CacheError::Timeout,
        SdkError::DispatchFailure(_) => {
            return CacheError::transport(format!(
                "S3 {} {}: {}",
                operation,
                key,
                DisplayErrorContext(&err)
            ))
        }
        _ => {}
    }
    match status_of(&err) {
        Some(status) => CacheError::store(format!(
            "S3 {} {} returned {}: {}",
            operation,
            key,
            status,
            DisplayErrorContext(&err)
        )),
        None => CacheError::store(format!(
            "S3 {} {} failed: {}",
            operation,
            key,
            DisplayErrorContext(&err)
        )),
    }
}

fn metadata_from(metadata: Option<&HashMap<String, String>>) -> ObjectMetadata {
    metadata
        .map(|fields| {
            fields
                .iter()
                .map(|(name, value)| (name.to_lowercase(), value.clone()))
                .collect()
        })
        .unwrap_or_default()
}
