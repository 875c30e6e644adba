//! # Cache Orchestrator Integration Tests
//!
//! Tier walk, write-back, coalescing and background refresh, using the
//! in-memory primary cache and object store with scripted origins.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{Duration as ChronoDuration, Utc};
use chrono::TimeZone;
use localization_cache::caching::durable::{ObjectMetadata, StoredObject};
use localization_cache::caching::stores::decode_fetched_at;
use localization_cache::caching::{
    CacheEntry, CacheError, CacheKey, CacheOrchestrator, CacheResult, InMemoryCache,
    InMemoryObjectStore, Lookup, ObjectStore, OrchestratorConfig, OutputMode, PrimaryCache,
    Tier, VersionedStore, EMPTY_PAYLOAD,
};
use localization_cache::origin::Origin;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

/// Origin answering every export with one payload, optionally gated
struct ScriptedOrigin {
    payload: Bytes,
    delay: Duration,
    gate: Option<Arc<Semaphore>>,
    calls: AtomicUsize,
}

impl ScriptedOrigin {
    fn new(payload: &'static str) -> Arc<Self> {
        Arc::new(Self {
            payload: Bytes::from_static(payload.as_bytes()),
            delay: Duration::ZERO,
            gate: None,
            calls: AtomicUsize::new(0),
        })
    }

    fn slow(payload: &'static str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            payload: Bytes::from_static(payload.as_bytes()),
            delay,
            gate: None,
            calls: AtomicUsize::new(0),
        })
    }

    fn gated(payload: &'static str, gate: Arc<Semaphore>) -> Arc<Self> {
        Arc::new(Self {
            payload: Bytes::from_static(payload.as_bytes()),
            delay: Duration::ZERO,
            gate: Some(gate),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Origin for ScriptedOrigin {
    async fn list_languages(&self, _app_id: &str) -> Bytes {
        Bytes::from_static(br#"[{"tag":"en"}]"#)
    }

    async fn export(&self, _app_id: &str, _lang: &str, _mode: OutputMode) -> Bytes {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.payload.clone()
    }

    async fn export_many(
        &self,
        _app_id: &str,
        _langs: &[String],
        _mode: OutputMode,
    ) -> HashMap<String, Bytes> {
        HashMap::new()
    }
}

/// Primary cache whose every call fails
struct UnreachableCache;

#[async_trait]
impl PrimaryCache for UnreachableCache {
    async fn get(&self, _key: &str) -> CacheResult<Option<Vec<u8>>> {
        Err(CacheError::Unavailable)
    }

    async fn set(&self, _key: &str, _value: &[u8], _ttl: Duration) -> CacheResult<()> {
        Err(CacheError::Unavailable)
    }

    async fn delete(&self, _key: &str) -> CacheResult<bool> {
        Err(CacheError::Unavailable)
    }

    async fn health_check(&self) -> CacheResult<bool> {
        Ok(false)
    }

    fn name(&self) -> &'static str {
        "unreachable"
    }
}

/// Origin whose exports never complete
#[derive(Default)]
struct StalledOrigin {
    calls: AtomicUsize,
}

#[async_trait]
impl Origin for StalledOrigin {
    async fn list_languages(&self, _app_id: &str) -> Bytes {
        std::future::pending::<Bytes>().await
    }

    async fn export(&self, _app_id: &str, _lang: &str, _mode: OutputMode) -> Bytes {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::future::pending::<Bytes>().await
    }

    async fn export_many(
        &self,
        _app_id: &str,
        _langs: &[String],
        _mode: OutputMode,
    ) -> HashMap<String, Bytes> {
        HashMap::new()
    }
}

/// Object store that either never answers or always fails
enum BrokenObjectStore {
    Hanging,
    Failing,
}

impl BrokenObjectStore {
    async fn answer<T>(&self) -> CacheResult<T> {
        match self {
            Self::Hanging => std::future::pending::<CacheResult<T>>().await,
            Self::Failing => Err(CacheError::store("bucket unreachable")),
        }
    }
}

#[async_trait]
impl ObjectStore for BrokenObjectStore {
    async fn put_object(
        &self,
        _key: &str,
        _body: Bytes,
        _content_type: &str,
        _metadata: &ObjectMetadata,
    ) -> CacheResult<()> {
        self.answer().await
    }

    async fn get_object(&self, _key: &str) -> CacheResult<Option<StoredObject>> {
        self.answer().await
    }

    async fn head_object(&self, _key: &str) -> CacheResult<Option<ObjectMetadata>> {
        self.answer().await
    }

    fn name(&self) -> &'static str {
        "broken"
    }
}

struct Harness {
    orchestrator: CacheOrchestrator,
    primary: InMemoryCache,
    objects: InMemoryObjectStore,
    durable: VersionedStore,
}

fn harness(origin: Arc<ScriptedOrigin>) -> Harness {
    let primary = InMemoryCache::new();
    let objects = InMemoryObjectStore::new();
    let durable = VersionedStore::new(Arc::new(objects.clone()), Duration::from_secs(1));
    let orchestrator = CacheOrchestrator::new(
        Arc::new(primary.clone()),
        Some(durable.clone()),
        origin,
        OrchestratorConfig::default(),
    );
    Harness {
        orchestrator,
        primary,
        objects,
        durable,
    }
}

fn en_flat() -> CacheKey {
    CacheKey::translations("app", "en", OutputMode::Flat)
}

async fn wait_for_refresh(orchestrator: &CacheOrchestrator, key: &CacheKey) {
    for _ in 0..200 {
        if !orchestrator.is_refreshing(key) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("refresh for {} did not finish", key);
}

#[tokio::test]
async fn test_origin_fill_writes_every_tier() {
    let origin = ScriptedOrigin::new(r#"{"hello":"world"}"#);
    let h = harness(origin.clone());
    let key = en_flat();

    let payload = h.orchestrator.get(&key).await;
    assert_eq!(payload, Bytes::from_static(br#"{"hello":"world"}"#));

    let cached = h
        .primary
        .get_entry(&key.cache_key(), &key.fetched_at_key())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cached.payload, payload);
    assert!(cached.fetched_at.is_some());

    // latest pointer plus one content-addressed version
    assert_eq!(h.objects.len(), 2);
    assert_eq!(
        h.objects.keys_with_prefix("localizations/app/en_flat/").len(),
        2
    );
    let latest = h.durable.get_latest(&key).await.unwrap();
    assert_eq!(latest.payload, payload);
    assert_eq!(origin.calls(), 1);
}

#[tokio::test]
async fn test_total_miss_returns_empty_sentinel_and_writes_nothing() {
    let origin = ScriptedOrigin::new("");
    let h = harness(origin);

    let payload = h.orchestrator.get(&en_flat()).await;
    assert_eq!(payload, Bytes::from_static(EMPTY_PAYLOAD));
    assert!(h.primary.is_empty());
    assert!(h.objects.is_empty());
}

#[tokio::test]
async fn test_durable_hit_is_written_back_without_new_version() {
    let origin = ScriptedOrigin::new(r#"{"from":"origin"}"#);
    let h = harness(origin.clone());
    let key = en_flat();

    h.durable
        .put_version(&key, Bytes::from_static(br#"{"from":"durable"}"#))
        .await
        .unwrap();

    let lookup = h.orchestrator.get_within(&key, Duration::from_secs(5)).await;
    assert_eq!(lookup.tier(), Some(Tier::Durable));
    assert_eq!(lookup.into_payload(), Bytes::from_static(br#"{"from":"durable"}"#));

    let second = h.orchestrator.get_within(&key, Duration::from_secs(5)).await;
    assert_eq!(second.tier(), Some(Tier::Primary));
    assert_eq!(h.objects.len(), 2);
    assert_eq!(origin.calls(), 0);
    assert_eq!(h.orchestrator.stats().refreshes_scheduled, 0);
}

#[tokio::test]
async fn test_concurrent_misses_fetch_once() {
    let origin = ScriptedOrigin::slow(r#"{"k":"v"}"#, Duration::from_millis(100));
    let h = harness(origin.clone());
    let key = en_flat();

    let lookups = (0..20).map(|_| {
        let orchestrator = h.orchestrator.clone();
        let key = key.clone();
        tokio::spawn(async move { orchestrator.get(&key).await })
    });
    let payloads = futures::future::join_all(lookups).await;

    for payload in payloads {
        assert_eq!(payload.unwrap(), Bytes::from_static(br#"{"k":"v"}"#));
    }
    assert_eq!(origin.calls(), 1);
    assert_eq!(h.objects.len(), 2);
}

#[tokio::test]
async fn test_stale_primary_hit_schedules_one_refresh() {
    let origin = ScriptedOrigin::new(r#"{"v":"fresh"}"#);
    let h = harness(origin.clone());
    let key = en_flat();

    let fetched_at = Utc::now() - ChronoDuration::minutes(16);
    h.primary
        .put_entry(
            &key.cache_key(),
            &key.fetched_at_key(),
            &CacheEntry::new(Bytes::from_static(br#"{"v":"stale"}"#), fetched_at),
            Duration::from_secs(600),
        )
        .await
        .unwrap();

    let payload = h.orchestrator.get(&key).await;
    assert_eq!(payload, Bytes::from_static(br#"{"v":"stale"}"#));
    assert_eq!(h.orchestrator.stats().refreshes_scheduled, 1);

    wait_for_refresh(&h.orchestrator, &key).await;
    assert_eq!(origin.calls(), 1);
    assert_eq!(
        h.orchestrator.get(&key).await,
        Bytes::from_static(br#"{"v":"fresh"}"#)
    );
    assert_eq!(h.orchestrator.stats().refreshes_scheduled, 1);
}

#[tokio::test]
async fn test_recent_primary_hit_is_not_refreshed() {
    let origin = ScriptedOrigin::new(r#"{"v":"fresh"}"#);
    let h = harness(origin.clone());
    let key = en_flat();

    let fetched_at = Utc::now() - ChronoDuration::minutes(10);
    h.primary
        .put_entry(
            &key.cache_key(),
            &key.fetched_at_key(),
            &CacheEntry::new(Bytes::from_static(br#"{"v":"cached"}"#), fetched_at),
            Duration::from_secs(600),
        )
        .await
        .unwrap();

    assert_eq!(
        h.orchestrator.get(&key).await,
        Bytes::from_static(br#"{"v":"cached"}"#)
    );
    assert_eq!(h.orchestrator.stats().refreshes_scheduled, 0);
    assert!(!h.orchestrator.is_refreshing(&key));
    assert_eq!(origin.calls(), 0);
}

#[tokio::test]
async fn test_unreachable_primary_serves_stale_durable_and_refreshes_once() {
    let gate = Arc::new(Semaphore::new(0));
    let origin = ScriptedOrigin::gated(r#"{"v":"new"}"#, gate.clone());
    let objects = InMemoryObjectStore::new();
    let durable = VersionedStore::new(Arc::new(objects.clone()), Duration::from_secs(1));
    let key = en_flat();

    durable
        .put_version_at(
            &key,
            Bytes::from_static(br#"{"v":"old"}"#),
            Utc::now() - ChronoDuration::minutes(20),
        )
        .await
        .unwrap();

    let orchestrator = CacheOrchestrator::new(
        Arc::new(UnreachableCache),
        Some(durable.clone()),
        origin.clone(),
        OrchestratorConfig::default(),
    );

    // The refresh is parked on the gate, so both lookups see the old pointer
    for _ in 0..2 {
        let lookup = orchestrator.get_within(&key, Duration::from_secs(2)).await;
        assert_eq!(lookup.tier(), Some(Tier::Durable));
        assert_eq!(lookup.into_payload(), Bytes::from_static(br#"{"v":"old"}"#));
    }
    assert_eq!(orchestrator.stats().refreshes_scheduled, 1);
    assert!(orchestrator.is_refreshing(&key));

    gate.add_permits(1);
    wait_for_refresh(&orchestrator, &key).await;

    assert_eq!(origin.calls(), 1);
    let latest = durable.get_latest(&key).await.unwrap();
    assert_eq!(latest.payload, Bytes::from_static(br#"{"v":"new"}"#));
    assert_eq!(objects.keys_with_prefix("localizations/app/en_flat/").len(), 3);
}

#[tokio::test]
async fn test_forced_rebuild_does_not_join_cached_fill() {
    let origin = ScriptedOrigin::slow(r#"{"v":1}"#, Duration::from_millis(50));
    let h = harness(origin.clone());
    let key = en_flat();

    let cached = {
        let orchestrator = h.orchestrator.clone();
        let key = key.clone();
        tokio::spawn(async move { orchestrator.get(&key).await })
    };
    let forced = h.orchestrator.rebuild(&key).await;

    assert!(matches!(forced, Lookup::Found { tier: Tier::Origin, .. }));
    assert_eq!(cached.await.unwrap(), Bytes::from_static(br#"{"v":1}"#));
    assert_eq!(origin.calls(), 2);
}

#[tokio::test]
async fn test_broken_durable_store_reads_as_absent() {
    for store in [BrokenObjectStore::Hanging, BrokenObjectStore::Failing] {
        let origin = ScriptedOrigin::new(r#"{"v":"origin"}"#);
        let orchestrator = CacheOrchestrator::new(
            Arc::new(InMemoryCache::new()),
            Some(VersionedStore::new(Arc::new(store), Duration::from_millis(100))),
            origin.clone(),
            OrchestratorConfig::default(),
        );
        let key = en_flat();

        let started = Instant::now();
        let lookup = orchestrator.get_within(&key, Duration::from_secs(5)).await;

        assert_eq!(lookup.tier(), Some(Tier::Origin));
        assert_eq!(lookup.into_payload(), Bytes::from_static(br#"{"v":"origin"}"#));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(origin.calls(), 1);

        // Primary write-back still happened
        let again = orchestrator.get_within(&key, Duration::from_secs(5)).await;
        assert_eq!(again.tier(), Some(Tier::Primary));
    }
}

#[tokio::test]
async fn test_stalled_origin_is_cut_off_by_deadline() {
    let origin = Arc::new(StalledOrigin::default());
    let orchestrator = CacheOrchestrator::new(
        Arc::new(InMemoryCache::new()),
        None,
        origin.clone(),
        OrchestratorConfig::default(),
    );
    let key = en_flat();

    let started = Instant::now();
    let lookup = orchestrator.get_within(&key, Duration::from_millis(300)).await;
    assert_eq!(lookup, Lookup::Empty);
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(!orchestrator.is_filling(&key));

    // The abandoned fill released its key, so the next lookup leads a new one
    let second = orchestrator.get_within(&key, Duration::from_millis(300)).await;
    assert_eq!(second, Lookup::Empty);
    assert_eq!(origin.calls.load(Ordering::SeqCst), 2);
    assert!(!orchestrator.is_filling(&key));
    assert_eq!(orchestrator.stats().empty_results, 2);
}

#[tokio::test]
async fn test_entry_without_sidecar_takes_stale_age_from_durable() {
    let origin = ScriptedOrigin::new(r#"{"v":"fresh"}"#);
    let h = harness(origin.clone());
    let key = en_flat();

    h.primary
        .set(&key.cache_key(), br#"{"v":"old"}"#, Duration::from_secs(600))
        .await
        .unwrap();
    h.durable
        .put_version_at(
            &key,
            Bytes::from_static(br#"{"v":"old"}"#),
            Utc::now() - ChronoDuration::minutes(20),
        )
        .await
        .unwrap();

    assert_eq!(h.orchestrator.get(&key).await, Bytes::from_static(br#"{"v":"old"}"#));

    for _ in 0..200 {
        if h.orchestrator.stats().refreshes_scheduled > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(h.orchestrator.stats().refreshes_scheduled, 1);

    wait_for_refresh(&h.orchestrator, &key).await;
    assert_eq!(origin.calls(), 1);
    assert_eq!(h.orchestrator.get(&key).await, Bytes::from_static(br#"{"v":"fresh"}"#));
}

#[tokio::test]
async fn test_entry_without_sidecar_gets_it_backfilled() {
    let origin = ScriptedOrigin::new(r#"{"v":"fresh"}"#);
    let h = harness(origin.clone());
    let key = en_flat();
    let created = Utc
        .timestamp_opt((Utc::now() - ChronoDuration::minutes(5)).timestamp(), 0)
        .unwrap();

    h.primary
        .set(&key.cache_key(), br#"{"v":"cached"}"#, Duration::from_secs(600))
        .await
        .unwrap();
    h.durable
        .put_version_at(&key, Bytes::from_static(br#"{"v":"cached"}"#), created)
        .await
        .unwrap();

    assert_eq!(
        h.orchestrator.get(&key).await,
        Bytes::from_static(br#"{"v":"cached"}"#)
    );

    let mut sidecar = None;
    for _ in 0..200 {
        sidecar = h.primary.get(&key.fetched_at_key()).await.unwrap();
        if sidecar.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let sidecar = sidecar.expect("sidecar backfilled");
    assert_eq!(decode_fetched_at(&sidecar), Some(created));

    let entry = h
        .primary
        .get_entry(&key.cache_key(), &key.fetched_at_key())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.fetched_at, Some(created));
    assert_eq!(h.orchestrator.stats().refreshes_scheduled, 0);
    assert_eq!(origin.calls(), 0);
}
