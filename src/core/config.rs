//! # Configuration Module
//!
//! Configuration structures and loading for the localization cache.
//!
//! ## Key Features
//! - YAML configuration parsing with serde
//! - Environment variable overrides using the deployment's variable names
//! - Validation that collects every problem into one error
//! - Durable tier misconfiguration is reported separately so it can disable that
//!   tier without stopping the process

use crate::core::error::{ServiceError, ServiceResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable holding the optional config file path
pub const CONFIG_PATH_ENV: &str = "LOCALIZATION_CACHE_CONFIG";

/// Main service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// HTTP server settings
    pub server: ServerConfig,

    /// Primary cache (Redis) settings
    pub redis: RedisConfig,

    /// Durable store (S3-compatible) settings
    pub s3: S3Config,

    /// Upstream translation provider settings
    pub tolgee: TolgeeConfig,

    /// Rebuild webhook settings
    pub webhook: WebhookConfig,

    /// Staleness and background refresh settings
    pub refresh: RefreshConfig,

    /// Language served when the requested one is unavailable
    pub fallback_language: String,

    /// Logging settings
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address to listen on
    pub bind_address: String,

    /// Deadline applied to every foreground lookup
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Use Redis as the primary cache; the in-memory store is used otherwise
    pub enabled: bool,

    /// Redis connection URL
    pub url: String,

    /// Optional password applied on top of the URL
    pub password: Option<String>,

    /// Prefix prepended to every key
    pub key_prefix: String,

    /// Timeout for a single Redis call
    #[serde(with = "humantime_serde")]
    pub operation_timeout: Duration,

    /// TTL for cached values and their fetched-at sidecars
    #[serde(with = "humantime_serde")]
    pub value_ttl: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct S3Config {
    pub enabled: bool,
    pub bucket: String,
    pub region: String,
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    /// Temporary-credential session token; empty for long-lived keys
    pub session_token: String,
    pub force_path_style: bool,

    /// Attempts per object store call, first try included
    pub max_attempts: u32,

    /// Timeout for a single object store call, retries included
    #[serde(with = "humantime_serde")]
    pub operation_timeout: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TolgeeConfig {
    /// Base URL of the Tolgee API
    pub base_url: String,

    /// Project API key, also used as the application identifier
    pub app_key: String,

    /// Timeout for a single upstream request
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Page size requested from paginated endpoints
    pub page_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Shared HMAC secret; without one every webhook is rejected
    pub secret: Option<String>,

    /// Maximum accepted signature age
    #[serde(with = "humantime_serde")]
    pub tolerance: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    /// Age after which a cache hit schedules a background refresh
    #[serde(with = "humantime_serde")]
    pub stale_after: Duration,

    /// Timeout of a detached background refresh
    #[serde(with = "humantime_serde")]
    pub background_timeout: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Text,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            redis: RedisConfig::default(),
            s3: S3Config::default(),
            tolgee: TolgeeConfig::default(),
            webhook: WebhookConfig::default(),
            refresh: RefreshConfig::default(),
            fallback_language: "en".to_string(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".to_string(),
            request_timeout: Duration::from_secs(15),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: "redis://localhost:6379".to_string(),
            password: None,
            key_prefix: String::new(),
            operation_timeout: Duration::from_secs(2),
            value_ttl: Duration::from_secs(10 * 60),
        }
    }
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            enabled: true,
            bucket: String::new(),
            region: "us-east-1".to_string(),
            endpoint: String::new(),
            access_key: String::new(),
            secret_key: String::new(),
            session_token: String::new(),
            force_path_style: true,
            max_attempts: 3,
            operation_timeout: Duration::from_secs(5),
        }
    }
}

impl Default for TolgeeConfig {
    fn default() -> Self {
        Self {
            base_url: "https://app.tolgee.io".to_string(),
            app_key: String::new(),
            request_timeout: Duration::from_secs(10),
            page_size: 1000,
        }
    }
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            secret: None,
            tolerance: Duration::from_secs(5 * 60),
        }
    }
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            stale_after: Duration::from_secs(15 * 60),
            background_timeout: Duration::from_secs(30),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
        }
    }
}

impl ServiceConfig {
    /// Load configuration: the YAML file named by `LOCALIZATION_CACHE_CONFIG` when set,
    /// defaults otherwise, then environment overrides and validation.
    pub async fn load() -> ServiceResult<Self> {
        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) if !path.trim().is_empty() => Self::from_yaml_file(path.trim()).await?,
            _ => Self::default(),
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a YAML file without applying overrides
    pub async fn from_yaml_file<P: AsRef<Path>>(path: P) -> ServiceResult<Self> {
        let content = tokio::fs::read_to_string(path.as_ref())
            .await
            .map_err(|e| ServiceError::config(format!("Failed to read config file: {}", e)))?;

        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> ServiceResult<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| ServiceError::config(format!("Failed to parse config: {}", e)))
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) -> ServiceResult<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary lookup, used by tests to avoid touching
    /// the process environment
    pub fn apply_overrides<F>(&mut self, lookup: F) -> ServiceResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("REDIS_ADDR") {
            self.redis.url = if addr.contains("://") {
                addr
            } else {
                format!("redis://{}", addr)
            };
        }

        if let Some(password) = lookup("REDIS_PASSWORD") {
            self.redis.password = Some(password).filter(|p| !p.is_empty());
        }

        if let Some(enabled) = lookup("REDIS_ENABLED") {
            self.redis.enabled = parse_bool("REDIS_ENABLED", &enabled)?;
        }

        if let Some(enabled) = lookup("S3_ENABLED") {
            self.s3.enabled = parse_bool("S3_ENABLED", &enabled)?;
        }

        if let Some(bucket) = lookup("S3_BUCKET") {
            self.s3.bucket = bucket;
        }

        if let Some(region) = lookup("S3_REGION") {
            self.s3.region = region;
        }

        if let Some(endpoint) = lookup("S3_ENDPOINT") {
            self.s3.endpoint = endpoint;
        }

        if let Some(key) = lookup("S3_ACCESS_KEY") {
            self.s3.access_key = key;
        }

        if let Some(key) = lookup("S3_SECRET_KEY") {
            self.s3.secret_key = key;
        }

        if let Some(token) = lookup("S3_SESSION_TOKEN") {
            self.s3.session_token = token;
        }

        if let Some(path_style) = lookup("S3_FORCE_PATH_STYLE") {
            self.s3.force_path_style = parse_bool("S3_FORCE_PATH_STYLE", &path_style)?;
        }

        if let Some(key) = lookup("TOLGEE_APP_KEY") {
            self.tolgee.app_key = key.trim().to_string();
        }

        if let Some(url) = lookup("TOLGEE_BASE_URL") {
            self.tolgee.base_url = url;
        }

        if let Some(secret) = lookup("WEBHOOK_SECRET") {
            self.webhook.secret = Some(secret).filter(|s| !s.is_empty());
        }

        if let Some(addr) = lookup("BIND_ADDRESS") {
            self.server.bind_address = addr;
        }

        if let Some(stale) = lookup("STALE_AFTER") {
            self.refresh.stale_after = humantime::parse_duration(&stale)
                .map_err(|e| ServiceError::config(format!("Invalid STALE_AFTER: {}", e)))?;
        }

        if let Some(level) = lookup("LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Some(format) = lookup("LOG_FORMAT") {
            self.logging.format = match format.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "text" => LogFormat::Text,
                other => {
                    return Err(ServiceError::config(format!("Invalid LOG_FORMAT: {}", other)))
                }
            };
        }

        Ok(())
    }

    /// Validate settings that would make the service unusable.
    ///
    /// Durable tier settings are not checked here; see [`S3Config::validate`].
    pub fn validate(&self) -> ServiceResult<()> {
        let mut errors = Vec::new();

        if self.tolgee.app_key.trim().is_empty() {
            errors.push("TOLGEE_APP_KEY is required".to_string());
        }

        if url::Url::parse(&self.tolgee.base_url).is_err() {
            errors.push(format!("Invalid Tolgee base URL: {}", self.tolgee.base_url));
        }

        if self.tolgee.page_size == 0 {
            errors.push("Tolgee page size must be greater than 0".to_string());
        }

        if self.server.bind_address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!("Invalid bind address: {}", self.server.bind_address));
        }

        if self.redis.enabled && url::Url::parse(&self.redis.url).is_err() {
            errors.push(format!("Invalid Redis URL: {}", self.redis.url));
        }

        if self.redis.value_ttl.is_zero() {
            errors.push("Redis value TTL must be greater than 0".to_string());
        }

        if self.refresh.background_timeout.is_zero() {
            errors.push("Background refresh timeout must be greater than 0".to_string());
        }

        if self.fallback_language.trim().is_empty() {
            errors.push("Fallback language must not be empty".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ServiceError::config(errors.join("; ")))
        }
    }
}

impl S3Config {
    /// Check the durable tier settings. A failure here disables only that tier.
    pub fn validate(&self) -> ServiceResult<()> {
        let required = [
            ("S3_BUCKET", &self.bucket),
            ("S3_ENDPOINT", &self.endpoint),
            ("S3_ACCESS_KEY", &self.access_key),
            ("S3_SECRET_KEY", &self.secret_key),
        ];

        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(name, _)| *name)
            .collect();

        if !missing.is_empty() {
            return Err(ServiceError::config(format!(
                "{} required",
                missing.join(", ")
            )));
        }

        url::Url::parse(&self.endpoint_url())
            .map_err(|e| ServiceError::config(format!("Invalid S3_ENDPOINT: {}", e)))?;

        if self.max_attempts == 0 {
            return Err(ServiceError::config("s3.max_attempts must be at least 1"));
        }

        Ok(())
    }

    /// Session token, if one is configured
    pub fn session_token(&self) -> Option<String> {
        let token = self.session_token.trim();
        (!token.is_empty()).then(|| token.to_string())
    }

    /// Endpoint with a scheme; bare `host:port` endpoints default to plain HTTP
    pub fn endpoint_url(&self) -> String {
        let endpoint = self.endpoint.trim().trim_end_matches('/');
        if endpoint.contains("://") {
            endpoint.to_string()
        } else {
            format!("http://{}", endpoint)
        }
    }
}

fn parse_bool(name: &str, value: &str) -> ServiceResult<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ServiceError::config(format!("Invalid {}: {}", name, other))),
    }
}
