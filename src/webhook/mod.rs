//! Rebuild webhook: signature checks and the full-project rebuild it triggers.

pub mod rebuild;
pub mod signature;

pub use rebuild::{rebuild, RebuildSummary};
pub use signature::{check, verify, SignatureError, SignatureHeader, DEFAULT_TOLERANCE, SIGNATURE_HEADER};

use crate::core::config::WebhookConfig;
use crate::core::error::{ServiceError, ServiceResult};
use crate::observability::metrics;
use chrono::Utc;
use std::time::Duration;
use tracing::{debug, warn};

/// Authenticates webhook calls against the configured secret
#[derive(Debug, Clone)]
pub struct WebhookVerifier {
    secret: Option<String>,
    tolerance: Duration,
}

impl WebhookVerifier {
    pub fn new(secret: Option<String>, tolerance: Duration) -> Self {
        Self { secret, tolerance }
    }

    pub fn from_config(config: &WebhookConfig) -> Self {
        Self::new(config.secret.clone(), config.tolerance)
    }

    pub fn has_secret(&self) -> bool {
        self.secret.as_deref().is_some_and(|secret| !secret.is_empty())
    }

    /// Reject with an authentication error unless `header` signs `body`
    pub fn authenticate(&self, header: Option<&str>, body: &[u8]) -> ServiceResult<SignatureHeader> {
        match check(self.secret.as_deref(), header, body, Utc::now(), self.tolerance) {
            Ok(signature) => {
                debug!(timestamp = signature.timestamp, "webhook signature accepted");
                Ok(signature)
            }
            Err(err) => {
                warn!(reason = err.reason(), error = %err, "webhook rejected");
                metrics::webhook_rejected(err.reason());
                Err(ServiceError::auth(err.to_string()))
            }
        }
    }
}
