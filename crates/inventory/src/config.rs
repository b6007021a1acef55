//! TOML configuration for an inventory deployment.
//!
//! ```toml
//! [primary]
//! cache_ttl_seconds = 3600
//! rate_limit = 10.0
//! rate_burst = 20
//!
//! [secondary]
//! enabled = false
//!
//! [background]
//! refresh_interval_seconds = 0   # disable refresh
//!
//! [enrichment]
//! max_concurrent = 8
//! ```

use std::path::Path;
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;
use thiserror::Error;

use imagecert_client::ClientConfig;
use imagecert_client::config::{PRIMARY_BURST, PRIMARY_RATE, SECONDARY_BURST, SECONDARY_RATE};

use crate::background::BackgroundConfig;
use crate::dispatch::DEFAULT_MAX_CONCURRENT;

/// Environment variable consulted when `[primary] api_key` is not set.
pub const PRIMARY_API_KEY_ENV: &str = "IMAGECERT_PRIMARY_API_KEY";

/// Longest TTL or interval accepted, in seconds (one year).
pub const MAX_PERIOD_SECONDS: u64 = 365 * 86_400;

/// Slowest positive rate limit accepted, in lookups per second.
pub const MIN_RATE_LIMIT: f64 = 1e-6;

/// Errors from loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
pub struct InventoryConfig {
    /// Primary certification source.
    #[serde(default)]
    pub primary: PrimaryConfig,
    /// Secondary popularity source (Docker Hub).
    #[serde(default)]
    pub secondary: SecondaryConfig,
    #[serde(default)]
    pub background: BackgroundProcessingConfig,
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
}

impl InventoryConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Reject values the runtime cannot honour.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_source("primary", self.primary.cache_ttl_seconds, self.primary.rate_limit)?;
        validate_source(
            "secondary",
            self.secondary.cache_ttl_seconds,
            self.secondary.rate_limit,
        )?;
        let bg = &self.background;
        if bg.cleanup_interval_seconds == 0 {
            return Err(ConfigError::Invalid(
                "background.cleanup_interval_seconds must be positive".to_owned(),
            ));
        }
        if bg.cache_sweep_interval_seconds == Some(0) {
            return Err(ConfigError::Invalid(
                "background.cache_sweep_interval_seconds must be positive".to_owned(),
            ));
        }
        check_period("background.cleanup_interval_seconds", bg.cleanup_interval_seconds)?;
        check_period("background.refresh_interval_seconds", bg.refresh_interval_seconds)?;
        check_period("background.refresh_jitter_seconds", bg.refresh_jitter_seconds)?;
        if let Some(sweep) = bg.cache_sweep_interval_seconds {
            check_period("background.cache_sweep_interval_seconds", sweep)?;
        }
        if self.enrichment.max_concurrent == 0 {
            return Err(ConfigError::Invalid(
                "enrichment.max_concurrent must be positive".to_owned(),
            ));
        }
        Ok(())
    }

    /// Background settings. Without an explicit cache sweep interval the
    /// caches are swept at half the primary TTL.
    pub fn background_config(&self) -> BackgroundConfig {
        let bg = &self.background;
        BackgroundConfig {
            cleanup_interval: Duration::from_secs(bg.cleanup_interval_seconds),
            enable_stale_reference_cleanup: bg.enable_stale_reference_cleanup,
            refresh_interval: Duration::from_secs(bg.refresh_interval_seconds),
            refresh_jitter_max: Duration::from_secs(bg.refresh_jitter_seconds),
            cache_sweep_interval: bg.cache_sweep_interval_seconds.map_or_else(
                || self.primary.client_config().sweep_interval(),
                Duration::from_secs,
            ),
        }
    }
}

fn validate_source(section: &str, ttl: u64, rate: f64) -> Result<(), ConfigError> {
    if ttl == 0 {
        return Err(ConfigError::Invalid(format!(
            "{section}.cache_ttl_seconds must be positive"
        )));
    }
    check_period(&format!("{section}.cache_ttl_seconds"), ttl)?;
    if !rate.is_finite() || rate < 0.0 {
        return Err(ConfigError::Invalid(format!(
            "{section}.rate_limit must be a non-negative number"
        )));
    }
    if rate > 0.0 && rate < MIN_RATE_LIMIT {
        return Err(ConfigError::Invalid(format!(
            "{section}.rate_limit must be 0 or at least {MIN_RATE_LIMIT}"
        )));
    }
    Ok(())
}

fn check_period(field: &str, seconds: u64) -> Result<(), ConfigError> {
    if seconds > MAX_PERIOD_SECONDS {
        return Err(ConfigError::Invalid(format!(
            "{field} must be at most {MAX_PERIOD_SECONDS} seconds"
        )));
    }
    Ok(())
}

/// Primary certification source settings.
#[derive(Debug, Deserialize)]
pub struct PrimaryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// TTL for cached lookups (seconds).
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_seconds: u64,
    /// Steady lookup rate per second. Zero disables limiting.
    #[serde(default = "default_primary_rate")]
    pub rate_limit: f64,
    #[serde(default = "default_primary_burst")]
    pub rate_burst: u32,
    /// Optional API key. Falls back to `IMAGECERT_PRIMARY_API_KEY`.
    #[serde(default)]
    pub api_key: Option<SecretString>,
}

impl Default for PrimaryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cache_ttl_seconds: default_cache_ttl(),
            rate_limit: default_primary_rate(),
            rate_burst: default_primary_burst(),
            api_key: None,
        }
    }
}

impl PrimaryConfig {
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            cache_ttl: Duration::from_secs(self.cache_ttl_seconds),
            rate: self.rate_limit,
            burst: self.rate_burst,
        }
    }

    /// The configured API key, or the value of
    /// [`PRIMARY_API_KEY_ENV`] when none is configured.
    pub fn resolve_api_key(&self) -> Option<SecretString> {
        self.resolve_api_key_with(|name| std::env::var(name).ok())
    }

    /// Like [`resolve_api_key`](Self::resolve_api_key) with an injectable
    /// environment lookup. Empty or whitespace-only values count as unset.
    pub fn resolve_api_key_with(
        &self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Option<SecretString> {
        use secrecy::ExposeSecret;

        if let Some(key) = &self.api_key
            && !key.expose_secret().trim().is_empty()
        {
            return Some(SecretString::new(key.expose_secret().clone()));
        }
        lookup(PRIMARY_API_KEY_ENV)
            .filter(|v| !v.trim().is_empty())
            .map(SecretString::new)
    }
}

/// Secondary popularity source settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SecondaryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_seconds: u64,
    #[serde(default = "default_secondary_rate")]
    pub rate_limit: f64,
    #[serde(default = "default_secondary_burst")]
    pub rate_burst: u32,
}

impl Default for SecondaryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cache_ttl_seconds: default_cache_ttl(),
            rate_limit: default_secondary_rate(),
            rate_burst: default_secondary_burst(),
        }
    }
}

impl SecondaryConfig {
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            cache_ttl: Duration::from_secs(self.cache_ttl_seconds),
            rate: self.rate_limit,
            burst: self.rate_burst,
        }
    }
}

/// Periodic task settings.
#[derive(Debug, Clone, Deserialize)]
pub struct BackgroundProcessingConfig {
    /// How often to drop stale workload references (seconds).
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_seconds: u64,
    #[serde(default = "default_true")]
    pub enable_stale_reference_cleanup: bool,
    /// How often to refresh certification data (seconds). Zero disables.
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_seconds: u64,
    /// Maximum random delay before the first refresh (seconds).
    #[serde(default = "default_refresh_jitter")]
    pub refresh_jitter_seconds: u64,
    /// How often to sweep expired cache entries (seconds).
    #[serde(default)]
    pub cache_sweep_interval_seconds: Option<u64>,
}

impl Default for BackgroundProcessingConfig {
    fn default() -> Self {
        Self {
            cleanup_interval_seconds: default_cleanup_interval(),
            enable_stale_reference_cleanup: true,
            refresh_interval_seconds: default_refresh_interval(),
            refresh_jitter_seconds: default_refresh_jitter(),
            cache_sweep_interval_seconds: None,
        }
    }
}

/// Detached enrichment settings.
#[derive(Debug, Clone, Deserialize)]
pub struct EnrichmentConfig {
    /// Maximum enrichments running at once.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_cache_ttl() -> u64 {
    3600
}

fn default_primary_rate() -> f64 {
    PRIMARY_RATE
}

fn default_primary_burst() -> u32 {
    PRIMARY_BURST
}

fn default_secondary_rate() -> f64 {
    SECONDARY_RATE
}

fn default_secondary_burst() -> u32 {
    SECONDARY_BURST
}

fn default_cleanup_interval() -> u64 {
    300
}

fn default_refresh_interval() -> u64 {
    86_400
}

fn default_refresh_jitter() -> u64 {
    300
}

fn default_max_concurrent() -> usize {
    DEFAULT_MAX_CONCURRENT
}
