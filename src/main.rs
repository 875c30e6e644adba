//! # Localization Cache - Main Entry Point
//!
//! Startup sequence:
//! 1. load configuration (YAML file when `LOCALIZATION_CACHE_CONFIG` is set,
//!    then environment overrides)
//! 2. install logging and the Prometheus recorder
//! 3. build the primary cache, durable store and Tolgee client
//! 4. warm every resource with a forced rebuild; failures are logged only
//! 5. serve HTTP until SIGINT or SIGTERM

use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

use localization_cache::caching::{
    CacheOrchestrator, InMemoryCache, ObjectStore, OrchestratorConfig, PrimaryCache, RedisCache,
    S3ObjectStore, VersionedStore,
};
use localization_cache::core::config::ServiceConfig;
use localization_cache::core::error::{ServiceError, ServiceResult};
use localization_cache::gateway::{AppState, LocalizationServer};
use localization_cache::observability::{init_logging, install_recorder};
use localization_cache::origin::TolgeeClient;
use localization_cache::webhook;

/// How often the in-memory primary cache drops expired entries
const MEMORY_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Localization cache stopped: {}", e);
        eprintln!("localization-cache: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> ServiceResult<()> {
    let config = ServiceConfig::load().await?;
    init_logging(&config.logging);

    info!("Starting localization cache v{}", env!("CARGO_PKG_VERSION"));

    let state = build_state(&config).await?;
    let state = match install_recorder() {
        Ok(handle) => state.with_metrics(handle),
        Err(e) => {
            warn!("Metrics disabled: {}", e);
            state
        }
    };

    info!(app = %state.app_key, "warmup: rebuilding languages and translations");
    let summary = webhook::rebuild(&state.orchestrator, &state.app_key).await;
    if summary.is_complete() {
        info!(refreshed = summary.refreshed, "warmup done");
    } else {
        warn!(
            refreshed = summary.refreshed,
            failures = ?summary.failures,
            "warmup finished with failures"
        );
    }

    let server = LocalizationServer::new(&config.server.bind_address, state)?;
    info!("Localization cache ready on {}", server.bind_addr());
    server.start(shutdown_signal()).await?;

    info!("Localization cache shutdown complete");
    Ok(())
}

async fn build_state(config: &ServiceConfig) -> ServiceResult<AppState> {
    let primary = build_primary(config)?;
    let durable = build_durable(config);
    let origin = TolgeeClient::new(&config.tolgee)
        .map_err(|e| ServiceError::config(format!("Tolgee client: {}", e)))?;

    let orchestrator = CacheOrchestrator::new(
        primary,
        durable,
        Arc::new(origin),
        OrchestratorConfig::from(config),
    );
    Ok(AppState::new(orchestrator, config))
}

fn build_primary(config: &ServiceConfig) -> ServiceResult<Arc<dyn PrimaryCache>> {
    if config.redis.enabled {
        let cache = RedisCache::new(&config.redis)
            .map_err(|e| ServiceError::config(format!("Redis: {}", e)))?;
        info!(url = %config.redis.url, "primary cache: redis");
        return Ok(Arc::new(cache));
    }

    let cache = InMemoryCache::new();
    cache.spawn_cleanup(MEMORY_CLEANUP_INTERVAL);
    info!("primary cache: in-memory (redis disabled)");
    Ok(Arc::new(cache))
}

/// Durable tier, or `None` when it is disabled or misconfigured
fn build_durable(config: &ServiceConfig) -> Option<VersionedStore> {
    if !config.s3.enabled {
        info!("durable store disabled");
        return None;
    }

    match S3ObjectStore::new(&config.s3) {
        Ok(store) => {
            info!(bucket = %config.s3.bucket, backend = store.name(), "durable store enabled");
            Some(VersionedStore::new(
                Arc::new(store),
                config.s3.operation_timeout,
            ))
        }
        Err(e) => {
            warn!("Durable store disabled: {}", e);
            None
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
