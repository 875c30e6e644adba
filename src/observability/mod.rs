// Structured logging
pub mod logging;

// Prometheus cache metrics
pub mod metrics;

pub use logging::init_logging;
pub use metrics::{install_recorder, MetricsError};
