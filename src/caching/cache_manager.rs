//! # Cache Orchestrator
//!
//! Composes the tiers into the read-through lookup:
//!
//! ```text
//! primary ──hit──▶ payload (+ staleness check)
//!    │miss
//!    ▼  (coalesced per key)
//! primary again ─▶ durable latest ─▶ origin
//!                      │hit              │hit
//!                      ▼                 ▼
//!               write primary     write primary + durable version
//! ```
//!
//! Every tier failure is logged and treated as a miss. When no tier has bytes the
//! caller gets [`EMPTY_PAYLOAD`], never an error. [`CacheOrchestrator::lookup`]
//! returns the typed [`Lookup`] for callers that need to tell the two apart.

use super::deduplication::RequestCoalescer;
use super::durable::VersionedStore;
use super::key_generator::{normalize_lang, CacheKey, OutputMode, Resource};
use super::refresh::{RefreshScheduler, StalenessPolicy};
use super::stores::{encode_fetched_at, CacheEntry, PrimaryCache};
use crate::core::config::ServiceConfig;
use crate::observability::metrics;
use crate::origin::Origin;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Payload served when every tier came up empty
pub const EMPTY_PAYLOAD: &[u8] = b"{}";

/// How a lookup treats the cache tiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// Primary, then durable, then origin
    Cached,
    /// Origin only; used by rebuilds and background refreshes
    Forced,
}

/// The tier that produced a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Primary,
    Durable,
    Origin,
}

impl Tier {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Durable => "durable",
            Self::Origin => "origin",
        }
    }
}

/// Outcome of one lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Found { payload: Bytes, tier: Tier },
    /// No tier produced bytes
    Empty,
}

impl Lookup {
    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found { .. })
    }

    pub fn tier(&self) -> Option<Tier> {
        match self {
            Self::Found { tier, .. } => Some(*tier),
            Self::Empty => None,
        }
    }

    /// Payload bytes, or [`EMPTY_PAYLOAD`]
    pub fn into_payload(self) -> Bytes {
        match self {
            Self::Found { payload, .. } => payload,
            Self::Empty => Bytes::from_static(EMPTY_PAYLOAD),
        }
    }
}

/// A translations lookup after default-language fallback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    /// Language whose payload is returned
    pub lang: String,
    pub payload: Bytes,
    /// Whether the fallback language was used
    pub fell_back: bool,
}

/// Orchestrator settings
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// TTL of primary cache values and their sidecars
    pub value_ttl: Duration,
    /// Deadline of a foreground lookup
    pub request_timeout: Duration,
    /// Age past which a hit schedules a refresh
    pub stale_after: Duration,
    /// Own timeout of each background refresh
    pub refresh_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            value_ttl: Duration::from_secs(600),
            request_timeout: Duration::from_secs(15),
            stale_after: Duration::from_secs(900),
            refresh_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&ServiceConfig> for OrchestratorConfig {
    fn from(config: &ServiceConfig) -> Self {
        Self {
            value_ttl: config.redis.value_ttl,
            request_timeout: config.server.request_timeout,
            stale_after: config.refresh.stale_after,
            refresh_timeout: config.refresh.background_timeout,
        }
    }
}

/// Lookup counters since startup
#[derive(Debug, Default)]
struct TierCounters {
    primary_hits: AtomicU64,
    durable_hits: AtomicU64,
    origin_hits: AtomicU64,
    empty_results: AtomicU64,
    refreshes_scheduled: AtomicU64,
}

/// Snapshot of the lookup counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub primary_hits: u64,
    pub durable_hits: u64,
    pub origin_hits: u64,
    pub empty_results: u64,
    pub refreshes_scheduled: u64,
}

struct Inner {
    primary: Arc<dyn PrimaryCache>,
    durable: Option<VersionedStore>,
    origin: Arc<dyn Origin>,
    flights: RequestCoalescer<Lookup>,
    age_lookups: RequestCoalescer<()>,
    refresher: RefreshScheduler,
    counters: TierCounters,
    config: OrchestratorConfig,
}

/// Read-through cache over primary, durable and origin tiers
#[derive(Clone)]
pub struct CacheOrchestrator {
    inner: Arc<Inner>,
}

impl CacheOrchestrator {
    /// Build an orchestrator from long-lived tier clients. `durable` is `None` when
    /// the durable tier is disabled or misconfigured.
    pub fn new(
        primary: Arc<dyn PrimaryCache>,
        durable: Option<VersionedStore>,
        origin: Arc<dyn Origin>,
        config: OrchestratorConfig,
    ) -> Self {
        let refresher = RefreshScheduler::new(
            StalenessPolicy::new(config.stale_after),
            config.refresh_timeout,
        );

        info!(
            primary = primary.name(),
            durable = durable.as_ref().map(VersionedStore::backend).unwrap_or("disabled"),
            origin = origin.name(),
            "cache orchestrator ready"
        );

        Self {
            inner: Arc::new(Inner {
                primary,
                durable,
                origin,
                flights: RequestCoalescer::new(),
                age_lookups: RequestCoalescer::new(),
                refresher,
                counters: TierCounters::default(),
                config,
            }),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    pub fn origin(&self) -> &Arc<dyn Origin> {
        &self.inner.origin
    }

    pub fn has_durable_tier(&self) -> bool {
        self.inner.durable.is_some()
    }

    /// Whether a background refresh for `key` is running
    pub fn is_refreshing(&self, key: &CacheKey) -> bool {
        self.inner.refresher.is_refreshing(key)
    }

    /// Whether a cached fill for `key` is in flight
    pub fn is_filling(&self, key: &CacheKey) -> bool {
        self.inner.flights.is_in_flight(&key.fill_key())
    }

    pub fn stats(&self) -> CacheStats {
        let counters = &self.inner.counters;
        CacheStats {
            primary_hits: counters.primary_hits.load(Ordering::Relaxed),
            durable_hits: counters.durable_hits.load(Ordering::Relaxed),
            origin_hits: counters.origin_hits.load(Ordering::Relaxed),
            empty_results: counters.empty_results.load(Ordering::Relaxed),
            refreshes_scheduled: counters.refreshes_scheduled.load(Ordering::Relaxed),
        }
    }

    /// Payload for `key`, or [`EMPTY_PAYLOAD`]. Bounded by the configured request
    /// timeout.
    pub async fn get(&self, key: &CacheKey) -> Bytes {
        self.get_within(key, self.inner.config.request_timeout)
            .await
            .into_payload()
    }

    /// Cached lookup bounded by `deadline`; an expired deadline reads as empty
    pub async fn get_within(&self, key: &CacheKey, deadline: Duration) -> Lookup {
        match tokio::time::timeout(deadline, self.lookup(key, FetchMode::Cached)).await {
            Ok(lookup) => lookup,
            Err(_) => {
                warn!(key = %key, deadline = ?deadline, "lookup deadline exceeded");
                self.record_empty(key);
                Lookup::Empty
            }
        }
    }

    /// Origin-only fetch with write-back, coalesced per key
    pub async fn rebuild(&self, key: &CacheKey) -> Lookup {
        self.lookup(key, FetchMode::Forced).await
    }

    /// Typed lookup without a deadline
    pub async fn lookup(&self, key: &CacheKey, mode: FetchMode) -> Lookup {
        let lookup = match mode {
            FetchMode::Cached => self.lookup_cached(key).await,
            FetchMode::Forced => {
                let this = self.clone();
                let target = key.clone();
                self.inner
                    .flights
                    .run(&key.force_key(), || async move { this.fill_from_origin(&target).await })
                    .await
                    .value
            }
        };

        if !lookup.is_found() {
            self.record_empty(key);
        }
        lookup
    }

    /// Translations for `lang`, then for `fallback` when the first lookup comes up
    /// empty. Never more than two lookups.
    pub async fn get_translations(
        &self,
        app_id: &str,
        lang: &str,
        mode: OutputMode,
        fallback: &str,
    ) -> Resolved {
        let deadline = self.inner.config.request_timeout;
        let requested = CacheKey::translations(app_id, lang, mode);
        let lang = requested.lang().unwrap_or_default().to_string();

        if let Lookup::Found { payload, .. } = self.get_within(&requested, deadline).await {
            return Resolved {
                lang,
                payload,
                fell_back: false,
            };
        }

        let fallback = normalize_lang(fallback);
        if fallback.is_empty() || fallback == lang {
            return Resolved {
                lang,
                payload: Bytes::from_static(EMPTY_PAYLOAD),
                fell_back: false,
            };
        }

        debug!(requested = %lang, fallback = %fallback, "falling back to default language");
        let key = CacheKey::translations(app_id, &fallback, mode);
        Resolved {
            payload: self.get_within(&key, deadline).await.into_payload(),
            lang: fallback,
            fell_back: true,
        }
    }

    /// Store a payload obtained from the origin outside of [`Self::lookup`]
    /// (for example a multi-language export) as if a forced fill had fetched it.
    pub async fn store_fetched(&self, key: &CacheKey, payload: Bytes) -> Lookup {
        if payload.is_empty() {
            return Lookup::Empty;
        }
        self.write_back(key, payload.clone(), Utc::now(), true).await;
        Lookup::Found {
            payload,
            tier: Tier::Origin,
        }
    }

    async fn lookup_cached(&self, key: &CacheKey) -> Lookup {
        if let Some(entry) = self.primary_entry(key).await {
            match entry.fetched_at {
                Some(fetched_at) => self.observe_staleness(key, Some(Utc::now() - fetched_at)),
                None => self.lookup_durable_age(key),
            }
            return self.found(key, entry.payload, Tier::Primary);
        }

        let this = self.clone();
        let target = key.clone();
        let coalesced = self
            .inner
            .flights
            .run(&key.fill_key(), || async move { this.fill(&target).await })
            .await;

        if coalesced.shared {
            debug!(key = %key, "served from coalesced fill");
        }
        coalesced.value
    }

    /// Body of a coalesced cached fill
    async fn fill(&self, key: &CacheKey) -> Lookup {
        // Another flight may have filled the key while this one was queued.
        if let Some(entry) = self.primary_entry(key).await {
            return self.found(key, entry.payload, Tier::Primary);
        }

        if let Some(durable) = &self.inner.durable {
            match durable.get_latest(key).await {
                Some(latest) if !latest.payload.is_empty() => {
                    let now = Utc::now();
                    let fetched_at = latest.created_at.unwrap_or(now);
                    self.write_back(key, latest.payload.clone(), fetched_at, false)
                        .await;
                    self.observe_staleness(key, latest.created_at.map(|created| now - created));
                    return self.found(key, latest.payload, Tier::Durable);
                }
                _ => {
                    debug!(key = %key, "durable miss");
                    metrics::tier_miss(Tier::Durable.as_str());
                }
            }
        }

        self.fill_from_origin(key).await
    }

    async fn fill_from_origin(&self, key: &CacheKey) -> Lookup {
        let payload = match key.resource() {
            Resource::Languages => self.inner.origin.list_languages(key.app_id()).await,
            Resource::Translations { lang, mode } => {
                let tag = key.upstream_lang().unwrap_or(lang);
                self.inner.origin.export(key.app_id(), tag, *mode).await
            }
        };

        if payload.is_empty() {
            debug!(key = %key, "origin returned nothing");
            metrics::tier_miss(Tier::Origin.as_str());
            return Lookup::Empty;
        }

        self.write_back(key, payload.clone(), Utc::now(), true).await;
        self.found(key, payload, Tier::Origin)
    }

    /// Write a payload to the primary tier and, for origin payloads, a new durable
    /// version. Failures are logged only.
    async fn write_back(
        &self,
        key: &CacheKey,
        payload: Bytes,
        fetched_at: DateTime<Utc>,
        new_version: bool,
    ) {
        let entry = CacheEntry::new(payload.clone(), fetched_at);
        match self
            .inner
            .primary
            .put_entry(
                &key.cache_key(),
                &key.fetched_at_key(),
                &entry,
                self.inner.config.value_ttl,
            )
            .await
        {
            Ok(()) => debug!(key = %key, bytes = payload.len(), "primary write-back"),
            Err(e) => {
                warn!(key = %key, tier = "primary", error = %e, "primary write-back failed");
                metrics::tier_error(Tier::Primary.as_str());
            }
        }

        if !new_version {
            return;
        }
        if let Some(durable) = &self.inner.durable {
            if let Err(e) = durable.put_version(key, payload).await {
                warn!(key = %key, tier = "durable", error = %e, "durable write-back failed");
                metrics::tier_error(Tier::Durable.as_str());
            }
        }
    }

    async fn primary_entry(&self, key: &CacheKey) -> Option<CacheEntry> {
        match self
            .inner
            .primary
            .get_entry(&key.cache_key(), &key.fetched_at_key())
            .await
        {
            Ok(Some(entry)) if !entry.payload.is_empty() => Some(entry),
            Ok(_) => {
                debug!(key = %key, "primary miss");
                metrics::tier_miss(Tier::Primary.as_str());
                None
            }
            Err(e) => {
                warn!(key = %key, tier = "primary", error = %e, "primary read failed");
                metrics::tier_error(Tier::Primary.as_str());
                None
            }
        }
    }

    /// A primary entry without its sidecar takes its age from the durable latest
    /// pointer. The HEAD runs detached, one per key at a time, and backfills the
    /// sidecar so later hits answer from the primary tier alone.
    fn lookup_durable_age(&self, key: &CacheKey) {
        let Some(durable) = self.inner.durable.clone() else {
            return;
        };
        let Some(guard) = self.inner.age_lookups.try_lead(&key.age_lookup_key()) else {
            return;
        };

        let this = self.clone();
        let key = key.clone();
        tokio::spawn(async move {
            if let Some(created_at) = durable.head_latest_created_at(&key).await {
                let sidecar = encode_fetched_at(created_at);
                if let Err(e) = this
                    .inner
                    .primary
                    .set(&key.fetched_at_key(), sidecar.as_bytes(), this.inner.config.value_ttl)
                    .await
                {
                    warn!(key = %key, error = %e, "sidecar backfill failed");
                }
                this.observe_staleness(&key, Some(Utc::now() - created_at));
            } else {
                debug!(key = %key, "entry age unknown");
            }
            guard.complete(());
        });
    }

    fn observe_staleness(&self, key: &CacheKey, age: Option<chrono::Duration>) {
        let this = self.clone();
        let target = key.clone();
        let scheduled = self
            .inner
            .refresher
            .refresh_if_stale(key, age, move || async move {
                let outcome = this.rebuild(&target).await;
                debug!(key = %target, refreshed = outcome.is_found(), "refresh outcome");
            });

        if scheduled {
            self.inner
                .counters
                .refreshes_scheduled
                .fetch_add(1, Ordering::Relaxed);
        }
    }

    fn found(&self, key: &CacheKey, payload: Bytes, tier: Tier) -> Lookup {
        let counter = match tier {
            Tier::Primary => &self.inner.counters.primary_hits,
            Tier::Durable => &self.inner.counters.durable_hits,
            Tier::Origin => &self.inner.counters.origin_hits,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        metrics::tier_hit(tier.as_str());
        debug!(key = %key, tier = tier.as_str(), bytes = payload.len(), "cache hit");
        Lookup::Found { payload, tier }
    }

    fn record_empty(&self, key: &CacheKey) {
        self.inner
            .counters
            .empty_results
            .fetch_add(1, Ordering::Relaxed);
        metrics::empty_sentinel(key.kind());
        warn!(key = %key, "no tier produced a payload");
    }
}
