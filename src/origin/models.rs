//! Tolgee response models and language-tag helpers.

use crate::caching::key_generator::normalize_lang;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One language record of a project
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LanguageRecord {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub original_name: Option<String>,
    #[serde(default)]
    pub flag_emoji: Option<String>,
    #[serde(default)]
    pub base: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedLanguages {
    #[serde(default)]
    pub languages: Vec<LanguageRecord>,
}

/// Pagination block of a hypermedia response
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub total_elements: u64,
    #[serde(default)]
    pub total_pages: u64,
    #[serde(default)]
    pub number: u64,
}

/// Language list as returned by `/v2/projects/languages`, or the flat
/// `{"languages": [...]}` form
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LanguagesEnvelope {
    #[serde(rename = "_embedded", default)]
    pub embedded: Option<EmbeddedLanguages>,
    #[serde(default)]
    pub languages: Vec<LanguageRecord>,
    #[serde(default)]
    pub page: Option<PageInfo>,
}

impl LanguagesEnvelope {
    /// Records from whichever field is populated
    pub fn records(&self) -> &[LanguageRecord] {
        if !self.languages.is_empty() {
            return &self.languages;
        }
        self.embedded
            .as_ref()
            .map(|embedded| embedded.languages.as_slice())
            .unwrap_or(&[])
    }

    pub fn total_pages(&self) -> u64 {
        self.page.map(|page| page.total_pages).unwrap_or(1)
    }
}

/// Language tags of a languages payload, trimmed but spelled as the provider
/// lists them (`pt-BR`).
///
/// Accepts a JSON array of records, `{"languages": [...]}` or the hypermedia
/// envelope. Records without a tag are skipped.
pub fn parse_language_tags(payload: &[u8]) -> Result<Vec<String>, serde_json::Error> {
    if let Ok(direct) = serde_json::from_slice::<Vec<LanguageRecord>>(payload) {
        return Ok(tags_of(&direct));
    }
    let envelope: LanguagesEnvelope = serde_json::from_slice(payload)?;
    Ok(tags_of(envelope.records()))
}

/// Normalised tags of a languages payload; an undecodable payload is simply empty
pub fn available_languages(payload: &[u8]) -> Vec<String> {
    if payload.is_empty() {
        return Vec::new();
    }
    parse_language_tags(payload)
        .unwrap_or_default()
        .iter()
        .map(|tag| normalize_lang(tag))
        .collect()
}

/// The provider's spelling of `tag`, matched case-insensitively
pub fn upstream_spelling<'a>(tags: &'a [String], tag: &str) -> Option<&'a str> {
    let wanted = normalize_lang(tag);
    tags.iter()
        .map(String::as_str)
        .find(|candidate| normalize_lang(candidate) == wanted)
}

fn tags_of(records: &[LanguageRecord]) -> Vec<String> {
    records
        .iter()
        .map(|record| record.tag.trim().to_string())
        .filter(|tag| !tag.is_empty())
        .collect()
}

/// Language tags of an `Accept-Language` header, most preferred first.
/// Entries with `q=0` and the `*` wildcard are dropped.
pub fn parse_accept_language(header: &str) -> Vec<String> {
    let mut weighted: Vec<(String, f32)> = header
        .split(',')
        .filter_map(|part| {
            let mut pieces = part.split(';');
            let tag = normalize_lang(pieces.next()?);
            if tag.is_empty() || tag == "*" {
                return None;
            }
            let quality = pieces
                .filter_map(|param| param.trim().strip_prefix("q="))
                .find_map(|q| q.trim().parse::<f32>().ok())
                .unwrap_or(1.0);
            (quality > 0.0).then_some((tag, quality))
        })
        .collect();

    // Stable: equal weights keep header order
    weighted.sort_by(|a, b| b.1.total_cmp(&a.1));
    weighted.into_iter().map(|(tag, _)| tag).collect()
}

/// First preferred tag that is available, trying each exact tag and then its
/// base subtag (`pt-br` → `pt`)
pub fn pick_language(preferred: &[String], available: &[String]) -> Option<String> {
    if available.is_empty() {
        return None;
    }
    let available: HashSet<String> = available.iter().map(|tag| normalize_lang(tag)).collect();

    preferred.iter().find_map(|tag| {
        let tag = normalize_lang(tag);
        if tag.is_empty() {
            return None;
        }
        if available.contains(&tag) {
            return Some(tag);
        }
        let (base, _) = tag.split_once('-')?;
        (!base.is_empty() && available.contains(base)).then(|| base.to_string())
    })
}
