//! # Cache Key Generator
//!
//! Deterministic keys for every cached resource.
//!
//! One [`CacheKey`] names one logical resource and produces all the strings the
//! tiers need:
//! - primary cache key (`languages:<app>`, `translations:<app>:<lang>:<flat|nested>`)
//!   and its `:fetched_utc` sidecar
//! - coalescer keys for the main path, forced fills and background refresh
//! - durable store object names for the latest pointer and for version objects

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Suffix of the primary cache entry holding the unix-seconds fetch time
pub const FETCHED_AT_SUFFIX: &str = ":fetched_utc";

/// Coalescer namespace for background refreshes
pub const REFRESH_NAMESPACE: &str = "refresh:";

/// Suffix separating forced fills from ordinary fills in the coalescer
pub const FORCE_SUFFIX: &str = ":force";

/// Coalescer namespace for durable age lookups of sidecar-less entries
pub const AGE_LOOKUP_NAMESPACE: &str = "age:";

/// Durable namespace for translation exports
pub const TRANSLATIONS_NAMESPACE: &str = "localizations";

/// Durable namespace for language lists
pub const LANGUAGES_NAMESPACE: &str = "tolgee-languages";

/// Shape of an exported translation file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// Keys flattened with a delimiter
    Flat,
    /// Keys expanded into nested objects
    Nested,
}

impl OutputMode {
    pub fn from_nested(nested: bool) -> Self {
        if nested {
            Self::Nested
        } else {
            Self::Flat
        }
    }

    pub fn is_nested(self) -> bool {
        matches!(self, Self::Nested)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flat => "flat",
            Self::Nested => "nested",
        }
    }

    /// Both modes, in rebuild order
    pub fn all() -> [OutputMode; 2] {
        [Self::Flat, Self::Nested]
    }
}

impl fmt::Display for OutputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What kind of upstream resource a key refers to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Resource {
    /// The project's language list
    Languages,
    /// The translations of one language in one output mode
    Translations { lang: String, mode: OutputMode },
}

/// Identity of one cached resource.
///
/// Equality and hashing cover the normalised identity only; the upstream
/// spelling of the language tag rides along for origin requests.
#[derive(Debug, Clone)]
pub struct CacheKey {
    app_id: String,
    resource: Resource,
    upstream_lang: Option<String>,
}

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        self.app_id == other.app_id && self.resource == other.resource
    }
}

impl Eq for CacheKey {}

impl Hash for CacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.app_id.hash(state);
        self.resource.hash(state);
    }
}

impl CacheKey {
    /// Key for the language list of an application
    pub fn languages(app_id: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            resource: Resource::Languages,
            upstream_lang: None,
        }
    }

    /// Key for one language export. The tag is normalised so that every caller
    /// (HTTP handlers, rebuilds) lands on the same entry; the trimmed original
    /// spelling is kept for the origin, which matches tags case-sensitively.
    pub fn translations(app_id: impl Into<String>, lang: &str, mode: OutputMode) -> Self {
        Self {
            app_id: app_id.into(),
            resource: Resource::Translations {
                lang: normalize_lang(lang),
                mode,
            },
            upstream_lang: Some(lang.trim().to_string()),
        }
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    /// Language tag for translation keys
    pub fn lang(&self) -> Option<&str> {
        match &self.resource {
            Resource::Languages => None,
            Resource::Translations { lang, .. } => Some(lang),
        }
    }

    /// Language tag as the origin spells it (`pt-BR`), for translation keys
    pub fn upstream_lang(&self) -> Option<&str> {
        self.upstream_lang.as_deref().or_else(|| self.lang())
    }

    pub fn mode(&self) -> Option<OutputMode> {
        match &self.resource {
            Resource::Languages => None,
            Resource::Translations { mode, .. } => Some(*mode),
        }
    }

    /// Short label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self.resource {
            Resource::Languages => "languages",
            Resource::Translations { .. } => "translations",
        }
    }

    /// Primary cache key
    pub fn cache_key(&self) -> String {
        match &self.resource {
            Resource::Languages => format!("languages:{}", escape_component(&self.app_id)),
            Resource::Translations { lang, mode } => format!(
                "translations:{}:{}:{}",
                escape_component(&self.app_id),
                escape_component(lang),
                mode
            ),
        }
    }

    /// Primary cache key of the fetched-at sidecar
    pub fn fetched_at_key(&self) -> String {
        format!("{}{}", self.cache_key(), FETCHED_AT_SUFFIX)
    }

    /// Coalescer key for ordinary fills
    pub fn fill_key(&self) -> String {
        self.cache_key()
    }

    /// Coalescer key for origin-only fills
    pub fn force_key(&self) -> String {
        format!("{}{}", self.cache_key(), FORCE_SUFFIX)
    }

    /// Coalescer key for background refreshes
    pub fn refresh_key(&self) -> String {
        format!("{}{}", REFRESH_NAMESPACE, self.cache_key())
    }

    /// Coalescer key for durable age lookups
    pub fn age_lookup_key(&self) -> String {
        format!("{}{}", AGE_LOOKUP_NAMESPACE, self.cache_key())
    }

    /// Object name of the durable latest pointer
    pub fn durable_latest_path(&self) -> String {
        format!("{}/latest.json", self.durable_prefix())
    }

    /// Object name of an immutable version, `timestamp` in `YYYYMMDDThhmmssZ` form
    pub fn durable_version_path(&self, timestamp: &str, sha256_hex: &str) -> String {
        format!("{}/{}_{}.json", self.durable_prefix(), timestamp, sha256_hex)
    }

    fn durable_prefix(&self) -> String {
        match &self.resource {
            Resource::Languages => format!(
                "{}/{}",
                LANGUAGES_NAMESPACE,
                sanitize_path_component(&self.app_id)
            ),
            Resource::Translations { lang, mode } => format!(
                "{}/{}/{}",
                TRANSLATIONS_NAMESPACE,
                sanitize_path_component(&self.app_id),
                sanitize_path_component(&format!("{}_{}", lang, mode))
            ),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.cache_key())
    }
}

/// Lower-cased, trimmed language tag
pub fn normalize_lang(tag: &str) -> String {
    tag.trim().to_lowercase()
}

/// Make a value safe as one segment of an object name: strips `..`, replaces
/// path separators, never returns an empty segment.
pub fn sanitize_path_component(value: &str) -> String {
    let cleaned = value
        .trim()
        .replace("..", "")
        .replace(['/', '\\'], "_");

    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}

/// Escape the key separator so that no two component tuples produce the same key.
/// Ordinary identifiers and language tags pass through unchanged.
fn escape_component(value: &str) -> String {
    if !value.contains([':', '%']) {
        return value.to_string();
    }
    value.replace('%', "%25").replace(':', "%3A")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_cache_key_strings() {
        let languages = CacheKey::languages("tgpak_1");
        assert_eq!(languages.cache_key(), "languages:tgpak_1");
        assert_eq!(languages.fetched_at_key(), "languages:tgpak_1:fetched_utc");

        let flat = CacheKey::translations("tgpak_1", "en", OutputMode::Flat);
        assert_eq!(flat.cache_key(), "translations:tgpak_1:en:flat");
        assert_eq!(flat.fetched_at_key(), "translations:tgpak_1:en:flat:fetched_utc");

        let nested = CacheKey::translations("tgpak_1", "de", OutputMode::Nested);
        assert_eq!(nested.to_string(), "translations:tgpak_1:de:nested");
    }

    #[test]
    fn test_coalescer_namespaces_are_distinct() {
        let key = CacheKey::translations("app", "en", OutputMode::Flat);
        let names: HashSet<String> = [
            key.fill_key(),
            key.force_key(),
            key.refresh_key(),
            key.age_lookup_key(),
        ]
        .into_iter()
        .collect();
        assert_eq!(names.len(), 4);
        assert_eq!(key.refresh_key(), "refresh:translations:app:en:flat");
    }

    #[test]
    fn test_language_tag_is_normalised() {
        let a = CacheKey::translations("app", " PT-BR ", OutputMode::Flat);
        let b = CacheKey::translations("app", "pt-br", OutputMode::Flat);
        assert_eq!(a, b);
        assert_eq!(a.lang(), Some("pt-br"));
        assert_eq!(a.cache_key(), b.cache_key());
        assert_eq!(a.durable_latest_path(), "localizations/app/pt-br_flat/latest.json");
    }

    #[test]
    fn test_upstream_spelling_is_kept_for_origin() {
        let key = CacheKey::translations("app", " zh-Hans ", OutputMode::Nested);
        assert_eq!(key.lang(), Some("zh-hans"));
        assert_eq!(key.upstream_lang(), Some("zh-Hans"));
        assert_eq!(CacheKey::languages("app").upstream_lang(), None);
    }

    #[test]
    fn test_separator_in_components_does_not_collide() {
        let a = CacheKey::translations("a:b", "c", OutputMode::Flat);
        let b = CacheKey::translations("a", "b:c", OutputMode::Flat);
        assert_ne!(a.cache_key(), b.cache_key());
        assert_eq!(a.cache_key(), "translations:a%3Ab:c:flat");
    }

    #[test]
    fn test_durable_paths() {
        let key = CacheKey::translations("tgpak_1", "en", OutputMode::Nested);
        assert_eq!(
            key.durable_latest_path(),
            "localizations/tgpak_1/en_nested/latest.json"
        );
        assert_eq!(
            key.durable_version_path("20240102T030405Z", "abc123"),
            "localizations/tgpak_1/en_nested/20240102T030405Z_abc123.json"
        );

        let languages = CacheKey::languages("tgpak_1");
        assert_eq!(
            languages.durable_latest_path(),
            "tolgee-languages/tgpak_1/latest.json"
        );
    }

    #[test]
    fn test_path_sanitization() {
        assert_eq!(sanitize_path_component("../../etc/passwd"), "__etc_passwd");
        assert_eq!(sanitize_path_component("a\\b"), "a_b");
        assert_eq!(sanitize_path_component("  "), "_");
        assert_eq!(sanitize_path_component(".."), "_");

        let key = CacheKey::languages("../evil/app");
        assert_eq!(key.durable_latest_path(), "tolgee-languages/_evil_app/latest.json");
    }
}
