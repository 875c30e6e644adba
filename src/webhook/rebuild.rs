//! Full rebuild of one project's cached resources.

use crate::caching::key_generator::normalize_lang;
use crate::caching::{CacheKey, CacheOrchestrator, Lookup, OutputMode};
use crate::origin::parse_language_tags;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{info, warn};

/// Result of a rebuild, returned by the webhook as JSON
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebuildSummary {
    pub app: String,
    pub languages: Vec<String>,
    /// Number of (language, mode) payloads refreshed
    pub refreshed: usize,
    pub failures: Vec<String>,
    /// RFC 3339, UTC
    pub started_at: String,
    pub finished_at: String,
}

impl RebuildSummary {
    fn start(app_id: &str) -> Self {
        Self {
            app: app_id.to_string(),
            languages: Vec::new(),
            refreshed: 0,
            failures: Vec::new(),
            started_at: now_rfc3339(),
            finished_at: String::new(),
        }
    }

    fn finish(mut self) -> Self {
        self.finished_at = now_rfc3339();
        self
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Refetch the language list and every language in both modes from the origin.
///
/// Tags go upstream and into the summary as the provider lists them; only cache
/// keys are normalised. Each mode is first requested as one multi-language
/// export; languages missing from that archive are fetched one by one. A failing
/// language is recorded and the others continue.
pub async fn rebuild(orchestrator: &CacheOrchestrator, app_id: &str) -> RebuildSummary {
    let mut summary = RebuildSummary::start(app_id);
    info!(app = app_id, "rebuild started");

    let payload = match orchestrator.rebuild(&CacheKey::languages(app_id)).await {
        Lookup::Found { payload, .. } => payload,
        Lookup::Empty => {
            summary
                .failures
                .push("languages fetch failed: empty payload".to_string());
            return summary.finish();
        }
    };

    let tags = match parse_language_tags(&payload) {
        Ok(tags) => dedupe(tags),
        Err(e) => {
            summary.failures.push(format!("languages decode failed: {}", e));
            return summary.finish();
        }
    };
    summary.languages = tags.clone();

    let mut exports: HashMap<OutputMode, HashMap<String, bytes::Bytes>> = HashMap::new();
    for mode in OutputMode::all() {
        let files = orchestrator.origin().export_many(app_id, &tags, mode).await;
        let files = files
            .into_iter()
            .map(|(stem, payload)| (normalize_lang(&stem), payload))
            .collect();
        exports.insert(mode, files);
    }

    for tag in &tags {
        for mode in OutputMode::all() {
            let key = CacheKey::translations(app_id, tag, mode);
            let bundled = exports
                .get(&mode)
                .and_then(|files| files.get(&normalize_lang(tag)))
                .filter(|payload| !payload.is_empty())
                .cloned();

            let outcome = match bundled {
                Some(payload) => orchestrator.store_fetched(&key, payload).await,
                None => orchestrator.rebuild(&key).await,
            };

            match outcome {
                Lookup::Found { .. } => summary.refreshed += 1,
                Lookup::Empty => {
                    warn!(app = app_id, lang = %tag, mode = %mode, "rebuild produced no payload");
                    summary.failures.push(format!("{} {}: empty payload", tag, mode));
                }
            }
        }
    }

    let summary = summary.finish();
    info!(
        app = app_id,
        languages = summary.languages.len(),
        refreshed = summary.refreshed,
        failures = summary.failures.len(),
        "rebuild finished"
    );
    summary
}

/// First spelling of each tag wins
fn dedupe(tags: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    tags.into_iter()
        .filter(|tag| seen.insert(normalize_lang(tag)))
        .collect()
}
