//! # HTTP Server Module
//!
//! Builds the axum router for the cache and runs it until shutdown.
//!
//! Routes:
//! - `GET /api/healthz` liveness check
//! - `ANY /api/update` signed rebuild webhook
//! - `GET /api/languages` project languages
//! - `GET /api/:lang?nested=` translations of one language
//! - `GET /metrics` Prometheus exposition, when a recorder is installed
//! - anything else: 404 with the negotiated-language payload

use crate::core::error::{ServiceError, ServiceResult};
use crate::gateway::handlers;
use crate::gateway::AppState;
use axum::{
    extract::Request,
    http::HeaderValue,
    middleware::{self, Next},
    response::Response,
    routing::{any, get},
    Router as AxumRouter,
};
use std::future::Future;
use std::net::SocketAddr;
use std::time::Instant;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument};

const SERVER_TIMING: &str = "server-timing";

/// Router with every route and layer installed
pub fn build_router(state: AppState) -> AxumRouter {
    AxumRouter::new()
        .route("/api/healthz", get(handlers::healthz))
        .route("/api/update", any(handlers::update))
        .route("/api/languages", get(handlers::languages))
        .route("/api/:lang", get(handlers::translations))
        .route("/metrics", get(handlers::metrics))
        .fallback(handlers::not_found)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::from_fn(server_timing)),
        )
        .with_state(state)
}

/// Appends `Server-Timing: app;dur=<ms>ms` to every response
async fn server_timing(request: Request, next: Next) -> Response {
    let started = Instant::now();
    let mut response = next.run(request).await;

    let value = format!("app;dur={}ms", started.elapsed().as_millis());
    if let Ok(value) = HeaderValue::from_str(&value) {
        response.headers_mut().append(SERVER_TIMING, value);
    }
    response
}

/// HTTP server bound to one address
pub struct LocalizationServer {
    bind_addr: SocketAddr,
    app: AxumRouter,
}

impl LocalizationServer {
    pub fn new(bind_address: &str, state: AppState) -> ServiceResult<Self> {
        let bind_addr = bind_address
            .parse()
            .map_err(|e| ServiceError::config(format!("Invalid bind address {}: {}", bind_address, e)))?;
        Ok(Self {
            bind_addr,
            app: build_router(state),
        })
    }

    pub fn bind_addr(&self) -> SocketAddr {
        self.bind_addr
    }

    /// Serve until `shutdown` resolves, then drain in-flight requests
    #[instrument(skip(self, shutdown))]
    pub async fn start<F>(self, shutdown: F) -> ServiceResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.bind_addr).await.map_err(|e| {
            ServiceError::internal(format!("Failed to bind server to {}: {}", self.bind_addr, e))
        })?;
        info!("HTTP server listening on {}", self.bind_addr);

        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| ServiceError::internal(format!("Server error: {}", e)))
    }
}

