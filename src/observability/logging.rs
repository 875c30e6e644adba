//! # Structured Logging
//!
//! Installs the global `tracing` subscriber: an `EnvFilter` built from
//! `RUST_LOG` when set, otherwise from the configured level, and a JSON or
//! plain-text formatter.

use crate::core::config::{LogFormat, LoggingConfig};
use tracing::{debug, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Filter used when neither `RUST_LOG` nor a valid level is available
pub const DEFAULT_FILTER: &str = "localization_cache=info,tower_http=info";

/// Directives for `level`, scoped to this crate and the HTTP layer
pub fn filter_directives(level: &str) -> String {
    match level.trim().parse::<Level>() {
        Ok(level) => {
            let level = level.to_string().to_lowercase();
            format!("localization_cache={},tower_http={}", level, level)
        }
        Err(_) => DEFAULT_FILTER.to_string(),
    }
}

fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directives(&config.level)))
}

/// Install the subscriber. Returns `false` when one was already installed,
/// which is expected in tests.
pub fn init_logging(config: &LoggingConfig) -> bool {
    let filter = env_filter(config);

    let installed = match config.format {
        LogFormat::Json => Registry::default()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_target(true),
            )
            .try_init()
            .is_ok(),
        LogFormat::Text => Registry::default()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .try_init()
            .is_ok(),
    };

    if !installed {
        debug!("tracing subscriber already installed");
    }
    installed
}
