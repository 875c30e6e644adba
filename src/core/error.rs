//! # Error Handling Module
//!
//! Process-level error type for the localization cache using the `thiserror` crate.
//!
//! Almost nothing in the cache path surfaces as an error: tier failures are absorbed
//! by the orchestrator and turned into "this tier has nothing". What remains here is
//! what can actually reach a caller or abort startup:
//! - configuration problems found while loading [`ServiceConfig`](crate::core::config::ServiceConfig)
//! - webhook authentication failures, which map to `401 Unauthorized`
//! - I/O and parsing failures while starting the process

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Main result type used throughout the service
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Top-level error type for the service
#[derive(Debug, Error, Clone)]
pub enum ServiceError {
    /// Configuration-related errors (invalid values, missing required settings)
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Webhook signature rejected
    #[error("Authentication failed: {reason}")]
    Authentication { reason: String },

    /// I/O errors (config file reads, socket binding)
    #[error("I/O error: {message}")]
    Io { message: String },

    /// YAML parsing errors for configuration files
    #[error("YAML error: {message}")]
    Yaml { message: String },

    /// Internal errors for unexpected failures
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ServiceError {
    /// Create a configuration error with a custom message
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an authentication error with a custom reason
    pub fn auth<S: Into<String>>(reason: S) -> Self {
        Self::Authentication {
            reason: reason.into(),
        }
    }

    /// Create an internal error with a custom message
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Authentication { .. } => StatusCode::UNAUTHORIZED,
            Self::Configuration { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Io { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Yaml { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable error type for API responses
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "configuration_error",
            Self::Authentication { .. } => "authentication_error",
            Self::Io { .. } => "io_error",
            Self::Yaml { .. } => "yaml_error",
            Self::Internal { .. } => "internal_error",
        }
    }
}

impl From<std::io::Error> for ServiceError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for ServiceError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Yaml {
            message: err.to_string(),
        }
    }
}

/// Authentication failures keep the fixed webhook body so the reason never leaks
/// to the caller; everything else gets the structured form.
impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let body = match &self {
            Self::Authentication { .. } => json!({ "error": "invalid webhook signature" }),
            _ => json!({
                "error": {
                    "code": status.as_u16(),
                    "message": self.to_string(),
                    "type": self.error_type(),
                }
            }),
        };

        (status, Json(body)).into_response()
    }
}

/// Convenience macro for creating configuration errors
///
/// Usage: `config_error!("Invalid bind address: {}", addr)`
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::core::error::ServiceError::config(format!($($arg)*))
    };
}
