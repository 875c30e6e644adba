//! # Metrics
//!
//! Prometheus counters for tier outcomes, refreshes and webhook rejections.
//! Recording goes through the `metrics` facade, so it is a no-op until
//! [`install_recorder`] has run (tests never install one).

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;
use thiserror::Error;

pub const TIER_HITS: &str = "cache_tier_hits_total";
pub const TIER_MISSES: &str = "cache_tier_misses_total";
pub const TIER_ERRORS: &str = "cache_tier_errors_total";
pub const REFRESH_SCHEDULED: &str = "cache_refresh_scheduled_total";
pub const EMPTY_SENTINEL: &str = "cache_empty_sentinel_total";
pub const WEBHOOK_REJECTIONS: &str = "webhook_rejections_total";
pub const ORIGIN_FETCH_DURATION: &str = "origin_fetch_duration_seconds";

const ORIGIN_FETCH_BUCKETS: &[f64] = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("Failed to initialize metrics exporter: {0}")]
    Initialization(String),
}

/// Install the global Prometheus recorder and return the handle used by `/metrics`
pub fn install_recorder() -> Result<PrometheusHandle, MetricsError> {
    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(ORIGIN_FETCH_DURATION.to_string()),
            ORIGIN_FETCH_BUCKETS,
        )
        .map_err(|e| MetricsError::Initialization(e.to_string()))?
        .install_recorder()
        .map_err(|e| MetricsError::Initialization(e.to_string()))?;

    describe_counter!(TIER_HITS, "Lookups answered by a cache tier");
    describe_counter!(TIER_MISSES, "Lookups a cache tier could not answer");
    describe_counter!(TIER_ERRORS, "Cache tier operations that failed");
    describe_counter!(REFRESH_SCHEDULED, "Background refreshes started");
    describe_counter!(EMPTY_SENTINEL, "Lookups answered with the empty payload");
    describe_counter!(WEBHOOK_REJECTIONS, "Webhook calls rejected by signature check");
    describe_histogram!(ORIGIN_FETCH_DURATION, Unit::Seconds, "Origin fetch latency");

    Ok(handle)
}

pub fn tier_hit(tier: &'static str) {
    counter!(TIER_HITS, "tier" => tier).increment(1);
}

pub fn tier_miss(tier: &'static str) {
    counter!(TIER_MISSES, "tier" => tier).increment(1);
}

pub fn tier_error(tier: &'static str) {
    counter!(TIER_ERRORS, "tier" => tier).increment(1);
}

pub fn refresh_scheduled() {
    counter!(REFRESH_SCHEDULED).increment(1);
}

pub fn empty_sentinel(kind: &'static str) {
    counter!(EMPTY_SENTINEL, "kind" => kind).increment(1);
}

pub fn webhook_rejected(reason: &'static str) {
    counter!(WEBHOOK_REJECTIONS, "reason" => reason).increment(1);
}

pub fn origin_fetch(kind: &'static str, elapsed: Duration) {
    histogram!(ORIGIN_FETCH_DURATION, "kind" => kind).record(elapsed.as_secs_f64());
}
