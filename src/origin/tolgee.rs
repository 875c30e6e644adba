//! # Tolgee Client
//!
//! HTTP client for the Tolgee REST API:
//! - `GET /v2/projects/languages` for the language list, following pagination
//! - `GET /v2/projects/export` for JSON exports, flat or nested, single-language
//!   or zipped for several languages

use super::models::LanguagesEnvelope;
use super::{Origin, OriginError};
use crate::caching::key_generator::OutputMode;
use crate::core::config::TolgeeConfig;
use crate::observability::metrics;
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

const LANGUAGES_PATH: &str = "/v2/projects/languages";
const EXPORT_PATH: &str = "/v2/projects/export";
const MAX_PAGES: u64 = 100;

/// Largest file accepted from an export archive, after decompression
const MAX_ARCHIVE_ENTRY_BYTES: u64 = 32 * 1024 * 1024;

/// Tolgee API client
#[derive(Clone)]
pub struct TolgeeClient {
    client: reqwest::Client,
    base_url: String,
    page_size: u32,
}

impl TolgeeClient {
    pub fn new(config: &TolgeeConfig) -> Result<Self, OriginError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("localization-cache/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| OriginError::Configuration(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            page_size: config.page_size,
        })
    }

    /// Language list; pages beyond the first are merged into one envelope
    pub async fn try_list_languages(&self, app_id: &str) -> Result<Bytes, OriginError> {
        require_app_key(app_id)?;

        let first = self.languages_page(app_id, 0).await?;
        let envelope: LanguagesEnvelope = match serde_json::from_slice(&first) {
            Ok(envelope) => envelope,
            // Not an envelope; hand it on untouched
            Err(_) => return Ok(first),
        };

        let total_pages = envelope.total_pages().min(MAX_PAGES);
        if total_pages <= 1 {
            return Ok(first);
        }

        let mut merged: Value = serde_json::from_slice(&first)?;
        for page in 1..total_pages {
            let body = self.languages_page(app_id, page).await?;
            let value: Value = serde_json::from_slice(&body)?;
            let records = value
                .pointer("/_embedded/languages")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();

            if let Some(Value::Array(all)) = merged.pointer_mut("/_embedded/languages") {
                all.extend(records);
            }
        }

        let merged_count = merged
            .pointer("/_embedded/languages")
            .and_then(Value::as_array)
            .map(Vec::len)
            .unwrap_or(0);
        if let Some(page) = merged.get_mut("page").and_then(Value::as_object_mut) {
            page.insert("number".to_string(), Value::from(0));
            page.insert("totalPages".to_string(), Value::from(1));
            page.insert("size".to_string(), Value::from(merged_count));
        }

        debug!(app = app_id, pages = total_pages, "merged paginated language list");
        Ok(Bytes::from(serde_json::to_vec(&merged)?))
    }

    /// JSON export of one language. The tag is sent as given; Tolgee matches
    /// tags case-sensitively.
    pub async fn try_export(
        &self,
        app_id: &str,
        lang: &str,
        mode: OutputMode,
    ) -> Result<Bytes, OriginError> {
        require_app_key(app_id)?;
        let query = self.export_query(app_id, lang.trim(), mode, false);
        self.get(EXPORT_PATH, "export", &query).await
    }

    /// Zipped export of several languages, unpacked into `tag → bytes`
    pub async fn try_export_many(
        &self,
        app_id: &str,
        langs: &[String],
        mode: OutputMode,
    ) -> Result<HashMap<String, Bytes>, OriginError> {
        require_app_key(app_id)?;
        let tags: Vec<String> = langs
            .iter()
            .map(|lang| lang.trim().to_string())
            .filter(|tag| !tag.is_empty())
            .collect();
        if tags.is_empty() {
            return Ok(HashMap::new());
        }

        let query = self.export_query(app_id, &tags.join(","), mode, true);
        let archive = self.get(EXPORT_PATH, "export", &query).await?;
        unpack_archive(&archive, MAX_ARCHIVE_ENTRY_BYTES)
    }

    async fn languages_page(&self, app_id: &str, page: u64) -> Result<Bytes, OriginError> {
        let mut query = vec![
            ("ak", app_id.to_string()),
            ("size", self.page_size.to_string()),
        ];
        if page > 0 {
            query.push(("page", page.to_string()));
        }
        self.get(LANGUAGES_PATH, "languages", &query).await
    }

    fn export_query(
        &self,
        app_id: &str,
        languages: &str,
        mode: OutputMode,
        zip: bool,
    ) -> Vec<(&'static str, String)> {
        let mut query = vec![
            ("ak", app_id.to_string()),
            ("size", self.page_size.to_string()),
            ("languages", languages.to_string()),
            ("format", "JSON".to_string()),
            ("zip", zip.to_string()),
        ];
        if !mode.is_nested() {
            query.push(("structureDelimiter", String::new()));
        }
        query
    }

    async fn get(
        &self,
        path: &str,
        endpoint: &'static str,
        query: &[(&'static str, String)],
    ) -> Result<Bytes, OriginError> {
        let started = Instant::now();
        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(OriginError::Status {
                endpoint,
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await?;
        metrics::origin_fetch(endpoint, started.elapsed());

        if body.is_empty() {
            return Err(OriginError::EmptyBody { endpoint });
        }
        debug!(endpoint, bytes = body.len(), elapsed = ?started.elapsed(), "tolgee ok");
        Ok(body)
    }
}

#[async_trait]
impl Origin for TolgeeClient {
    async fn list_languages(&self, app_id: &str) -> Bytes {
        match self.try_list_languages(app_id).await {
            Ok(body) => {
                info!(bytes = body.len(), "fetched language list from tolgee");
                body
            }
            Err(e) => {
                warn!(error = %e, "tolgee language list failed");
                Bytes::new()
            }
        }
    }

    async fn export(&self, app_id: &str, lang: &str, mode: OutputMode) -> Bytes {
        match self.try_export(app_id, lang, mode).await {
            Ok(body) => {
                info!(lang, mode = %mode, bytes = body.len(), "fetched export from tolgee");
                body
            }
            Err(e) => {
                warn!(lang, mode = %mode, error = %e, "tolgee export failed");
                Bytes::new()
            }
        }
    }

    async fn export_many(
        &self,
        app_id: &str,
        langs: &[String],
        mode: OutputMode,
    ) -> HashMap<String, Bytes> {
        match self.try_export_many(app_id, langs, mode).await {
            Ok(files) => files,
            Err(e) => {
                warn!(languages = ?langs, mode = %mode, error = %e, "tolgee multi-language export failed");
                HashMap::new()
            }
        }
    }

    fn name(&self) -> &'static str {
        "tolgee"
    }
}

fn require_app_key(app_id: &str) -> Result<(), OriginError> {
    if app_id.trim().is_empty() {
        Err(OriginError::MissingAppKey)
    } else {
        Ok(())
    }
}

/// One entry per file in the archive, named by the file stem as spelled in the
/// archive; directories skipped. Entries inflating past the size cap are an error.
fn unpack_archive(
    archive: &[u8],
    max_entry_bytes: u64,
) -> Result<HashMap<String, Bytes>, OriginError> {
    let mut zip = zip::ZipArchive::new(Cursor::new(archive))?;
    let mut files = HashMap::with_capacity(zip.len());

    for index in 0..zip.len() {
        let mut file = zip.by_index(index)?;
        if file.is_dir() {
            continue;
        }

        let tag = Path::new(file.name())
            .file_stem()
            .and_then(|stem| stem.to_str())
            .map(|stem| stem.trim().to_string())
            .unwrap_or_default();
        if tag.is_empty() {
            continue;
        }

        let mut contents = Vec::new();
        (&mut file)
            .take(max_entry_bytes + 1)
            .read_to_end(&mut contents)?;
        if contents.len() as u64 > max_entry_bytes {
            return Err(OriginError::Archive(format!(
                "{} inflates past {} bytes",
                file.name(),
                max_entry_bytes
            )));
        }
        files.insert(tag, Bytes::from(contents));
    }

    Ok(files)
}
