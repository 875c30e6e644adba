//! # Localization Cache
//!
//! A read-through cache in front of a Tolgee project. Lookups go through three
//! tiers, each consulted only when the one before has nothing:
//!
//! 1. the primary cache (Redis, or an in-process map when Redis is disabled)
//! 2. the durable store (S3-compatible, content-addressed versions plus a
//!    `latest.json` pointer)
//! 3. the origin (the Tolgee HTTP API)
//!
//! A hit is written back to every shallower tier. Concurrent misses for one key
//! share a single fill, and hits older than the staleness threshold are served
//! immediately while one detached refresh per key runs in the background.

/// Error types and configuration
pub mod core;

/// Tiered cache: keys, stores, coalescing, staleness and the orchestrator
pub mod caching;

/// Upstream translation provider
pub mod origin;

/// Signed rebuild webhook
pub mod webhook;

/// axum routes and server
pub mod gateway;

/// Logging and metrics
pub mod observability;

pub use crate::core::config::ServiceConfig;
pub use crate::core::error::{ServiceError, ServiceResult};
pub use caching::{CacheKey, CacheOrchestrator, Lookup, OutputMode};
pub use gateway::{build_router, AppState, LocalizationServer};
pub use origin::{Origin, TolgeeClient};
pub use webhook::{RebuildSummary, WebhookVerifier};
