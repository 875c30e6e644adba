//! # Caching System Module
//!
//! Read-through caching in front of the translation provider.
//!
//! ## Architecture
//! A lookup walks a fixed chain of tiers and stops at the first one that has bytes:
//! 1. **Primary cache**: Redis (or the in-memory store) with per-key TTL and a
//!    `:fetched_utc` sidecar
//! 2. **Durable store**: S3-compatible bucket holding a mutable `latest.json` pointer
//!    and immutable, content-addressed version objects
//! 3. **Origin**: the Tolgee API
//!
//! Deeper hits are written back to the shallower tiers. The [`RequestCoalescer`]
//! keeps fills to one per key, and the [`RefreshScheduler`] refreshes stale hits in
//! the background without holding up the response.
//!
//! ## Usage Example
//! ```rust,ignore
//! let orchestrator = CacheOrchestrator::new(primary, durable, origin, OrchestratorConfig::default());
//! let key = CacheKey::translations("tgpak_xxx", "en", OutputMode::Flat);
//! let payload = orchestrator.get(&key).await;
//! ```

pub mod cache_manager;
pub mod deduplication;
pub mod durable;
pub mod key_generator;
pub mod refresh;
pub mod stores;

pub use cache_manager::{
    CacheOrchestrator, CacheStats, FetchMode, Lookup, OrchestratorConfig, Resolved, Tier,
    EMPTY_PAYLOAD,
};
pub use deduplication::{Coalesced, FlightGuard, RequestCoalescer};
pub use durable::{InMemoryObjectStore, LatestObject, ObjectStore, S3ObjectStore, VersionedStore};
pub use key_generator::{CacheKey, OutputMode, Resource};
pub use refresh::{RefreshScheduler, StalenessPolicy};
pub use stores::{CacheEntry, InMemoryCache, PrimaryCache, RedisCache};

/// Cache operation result
pub type CacheResult<T> = Result<T, CacheError>;

/// Tier-level failures.
///
/// None of these cross the orchestrator boundary: each one turns into "this tier
/// has nothing" and the chain continues.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Missing or invalid credentials/settings; disables the tier
    #[error("Cache configuration error: {message}")]
    Configuration { message: String },

    /// The call did not finish within its timeout
    #[error("Cache operation timeout")]
    Timeout,

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Network failure talking to a remote tier
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// The remote tier answered with an unexpected status
    #[error("Cache store error: {message}")]
    Store { message: String },

    /// Stored bytes or metadata could not be parsed
    #[error("Decode error: {message}")]
    Decode { message: String },

    #[error("Cache not available")]
    Unavailable,
}

impl CacheError {
    pub fn store<S: Into<String>>(message: S) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    pub fn decode<S: Into<String>>(message: S) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    pub fn transport<S: Into<String>>(message: S) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Whether the failure is transient rather than a misconfiguration
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::Redis(_) | Self::Transport { .. } | Self::Unavailable
        )
    }
}

impl From<tokio::time::error::Elapsed> for CacheError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::Timeout
    }
}

/// Run a tier call under a timeout, folding the elapsed case into [`CacheError::Timeout`]
pub(crate) async fn with_timeout<T, F>(limit: std::time::Duration, call: F) -> CacheResult<T>
where
    F: std::future::Future<Output = CacheResult<T>>,
{
    tokio::time::timeout(limit, call).await?
}
