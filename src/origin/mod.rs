//! # Origin Adapter
//!
//! The upstream translation provider. Every public operation returns bytes, which
//! may be empty: transport failures, non-2xx statuses and empty bodies are logged
//! and become an empty payload, never an error.

pub mod models;
pub mod tolgee;

pub use models::{
    available_languages, parse_accept_language, parse_language_tags, pick_language,
    upstream_spelling,
};
pub use tolgee::TolgeeClient;

use crate::caching::key_generator::OutputMode;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use thiserror::Error;

/// Failures inside the adapter; used for logging and by the `try_*` calls
#[derive(Debug, Error)]
pub enum OriginError {
    #[error("Origin transport error: {0}")]
    Transport(String),

    #[error("Origin returned status {status} for {endpoint}")]
    Status { endpoint: &'static str, status: u16 },

    #[error("Origin returned an empty body for {endpoint}")]
    EmptyBody { endpoint: &'static str },

    #[error("Invalid export archive: {0}")]
    Archive(String),

    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Tolgee app key is required")]
    MissingAppKey,

    #[error("Origin configuration error: {0}")]
    Configuration(String),
}

impl From<reqwest::Error> for OriginError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<zip::result::ZipError> for OriginError {
    fn from(err: zip::result::ZipError) -> Self {
        Self::Archive(err.to_string())
    }
}

impl From<std::io::Error> for OriginError {
    fn from(err: std::io::Error) -> Self {
        Self::Archive(err.to_string())
    }
}

/// Upstream provider of language lists and translation exports
#[async_trait]
pub trait Origin: Send + Sync {
    /// Language list of a project; empty on failure
    async fn list_languages(&self, app_id: &str) -> Bytes;

    /// Translations of one language; empty on failure
    async fn export(&self, app_id: &str, lang: &str, mode: OutputMode) -> Bytes;

    /// Translations of several languages in one request, keyed by language tag;
    /// empty on failure
    async fn export_many(
        &self,
        app_id: &str,
        langs: &[String],
        mode: OutputMode,
    ) -> HashMap<String, Bytes>;

    fn name(&self) -> &'static str {
        "origin"
    }
}
