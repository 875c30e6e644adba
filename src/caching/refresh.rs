//! # Background Refresh
//!
//! Decides when a cached payload is stale and refreshes it off the request path.
//! At most one refresh per key runs at a time; a request that finds one already
//! running does not start another.

use super::deduplication::RequestCoalescer;
use super::key_generator::CacheKey;
use crate::observability::metrics;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Staleness threshold used when none is configured
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(15 * 60);

/// Age-based staleness rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StalenessPolicy {
    threshold: Duration,
}

impl Default for StalenessPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_STALE_AFTER)
    }
}

impl StalenessPolicy {
    pub fn new(threshold: Duration) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    /// Stale when the age is strictly greater than the threshold. An unknown age
    /// never triggers a refresh, and neither does a negative one (clock skew).
    pub fn is_stale(&self, age: Option<chrono::Duration>) -> bool {
        let Some(age) = age else {
            return false;
        };
        match age.to_std() {
            Ok(age) => age > self.threshold,
            Err(_) => false,
        }
    }
}

/// Runs refreshes as detached tasks, one per key
#[derive(Clone)]
pub struct RefreshScheduler {
    policy: StalenessPolicy,
    flights: RequestCoalescer<()>,
    timeout: Duration,
}

impl RefreshScheduler {
    pub fn new(policy: StalenessPolicy, timeout: Duration) -> Self {
        Self {
            policy,
            flights: RequestCoalescer::new(),
            timeout,
        }
    }

    pub fn policy(&self) -> &StalenessPolicy {
        &self.policy
    }

    /// Whether a refresh for `key` is running
    pub fn is_refreshing(&self, key: &CacheKey) -> bool {
        self.flights.is_in_flight(&key.refresh_key())
    }

    /// Start `refresh` in the background when `age` is past the threshold.
    /// Returns whether a refresh was started.
    pub fn refresh_if_stale<F, Fut>(
        &self,
        key: &CacheKey,
        age: Option<chrono::Duration>,
        refresh: F,
    ) -> bool
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if !self.policy.is_stale(age) {
            return false;
        }
        self.schedule(key, refresh)
    }

    /// Start `refresh` in the background unless one is already running for `key`.
    /// Never waits for the refresh; its outcome is only logged.
    pub fn schedule<F, Fut>(&self, key: &CacheKey, refresh: F) -> bool
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let Some(guard) = self.flights.try_lead(&key.refresh_key()) else {
            debug!(key = %key, "refresh already running");
            return false;
        };

        metrics::refresh_scheduled();
        info!(key = %key, "scheduling background refresh");

        let timeout = self.timeout;
        let label = key.to_string();
        tokio::spawn(async move {
            match tokio::time::timeout(timeout, refresh()).await {
                Ok(()) => debug!(key = %label, "background refresh finished"),
                Err(_) => warn!(key = %label, timeout = ?timeout, "background refresh timed out"),
            }
            guard.complete(());
        });

        true
    }
}
