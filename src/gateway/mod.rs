//! HTTP surface of the cache.

pub mod handlers;
pub mod server;

pub use server::{build_router, LocalizationServer};

use crate::caching::CacheOrchestrator;
use crate::core::config::ServiceConfig;
use crate::webhook::WebhookVerifier;
use metrics_exporter_prometheus::PrometheusHandle;

/// Shared state of every handler
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: CacheOrchestrator,
    /// Project served by this instance
    pub app_key: String,
    pub fallback_language: String,
    pub verifier: WebhookVerifier,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(orchestrator: CacheOrchestrator, config: &ServiceConfig) -> Self {
        Self {
            orchestrator,
            app_key: config.tolgee.app_key.clone(),
            fallback_language: config.fallback_language.clone(),
            verifier: WebhookVerifier::from_config(&config.webhook),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}
