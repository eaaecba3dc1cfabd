//! # Engine Configuration
//!
//! Configuration management for the sync engine.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     COURIER_BASE_URL=https://orders.example.com                        │
//! │     COURIER_SYNC_INTERVAL=300000                                       │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/dashboard/engine.toml (Linux)                            │
//! │     ~/Library/Application Support/com.courier.dashboard/engine.toml    │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # engine.toml
//! debug = false
//!
//! [api]
//! base_url = "http://localhost:3000"
//! timeout_ms = 30000
//! health_timeout_ms = 5000
//! health_endpoints = ["/api/health", "/health", "/api/status", "/"]
//! orders_path = "/api/orders"
//!
//! [sync]
//! sync_interval_ms = 300000
//! min_sync_gap_ms = 30000
//! health_check_interval_ms = 60000
//! max_retries = 3
//! retry_delay_ms = 2000
//!
//! [cache]
//! cache_duration_ms = 300000
//! max_age_multiplier = 10
//! max_entries = 500
//!
//! [storage]
//! database_path = "/var/lib/courier/courier.db"
//! snapshot_path = "/var/lib/courier/orders-snapshot.json"
//! ```
//!
//! All durations are milliseconds, matching the dashboard's own settings.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{SyncError, SyncResult};

// =============================================================================
// API Settings
// =============================================================================

/// Where the order service lives and how long to wait for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiSettings {
    /// Base URL of the order service (`BASE_URL`).
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Timeout for data requests (`TIMEOUT`).
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,

    /// Timeout for each health probe request.
    #[serde(default = "default_health_timeout")]
    pub health_timeout_ms: u64,

    /// Health probe candidates, tried in order, relative to `base_url`.
    #[serde(default = "default_health_endpoints")]
    pub health_endpoints: Vec<String>,

    /// Path of the order list, relative to `base_url`.
    #[serde(default = "default_orders_path")]
    pub orders_path: String,
}

fn default_base_url() -> String {
    "http://localhost:3000".to_string()
}
fn default_timeout() -> u64 {
    30_000
}
fn default_health_timeout() -> u64 {
    5_000
}
fn default_health_endpoints() -> Vec<String> {
    ["/api/health", "/health", "/api/status", "/"]
        .into_iter()
        .map(String::from)
        .collect()
}
fn default_orders_path() -> String {
    "/api/orders".to_string()
}

impl Default for ApiSettings {
    fn default() -> Self {
        ApiSettings {
            base_url: default_base_url(),
            timeout_ms: default_timeout(),
            health_timeout_ms: default_health_timeout(),
            health_endpoints: default_health_endpoints(),
            orders_path: default_orders_path(),
        }
    }
}

// =============================================================================
// Sync Settings
// =============================================================================

/// Scheduling, rate limiting and retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Background polling period (`SYNC_INTERVAL`).
    #[serde(default = "default_sync_interval")]
    pub sync_interval_ms: u64,

    /// Minimum time between two sync attempts, forced ones included.
    #[serde(default = "default_min_sync_gap")]
    pub min_sync_gap_ms: u64,

    /// Health probe period (`HEALTH_CHECK_INTERVAL`).
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval_ms: u64,

    /// Attempts per outbox entry, and scheduled retries per failed cycle
    /// (`MAX_RETRIES`).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial delay before retrying a failed cycle (`RETRY_DELAY`).
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
}

fn default_sync_interval() -> u64 {
    5 * 60 * 1000
}
fn default_min_sync_gap() -> u64 {
    30_000
}
fn default_health_check_interval() -> u64 {
    60_000
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_delay() -> u64 {
    2_000
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            sync_interval_ms: default_sync_interval(),
            min_sync_gap_ms: default_min_sync_gap(),
            health_check_interval_ms: default_health_check_interval(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay(),
        }
    }
}

// =============================================================================
// Cache Settings
// =============================================================================

/// TTL facade and cache maintenance settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Fresh lifetime of a cached resource (`CACHE_DURATION`).
    #[serde(default = "default_cache_duration")]
    pub cache_duration_ms: u64,

    /// Stale data older than `cache_duration * max_age_multiplier` is
    /// never served without a fetch attempt.
    #[serde(default = "default_max_age_multiplier")]
    pub max_age_multiplier: u32,

    /// Expiring cache entries kept by periodic eviction.
    #[serde(default = "default_max_entries")]
    pub max_entries: u32,
}

fn default_cache_duration() -> u64 {
    5 * 60 * 1000
}
fn default_max_age_multiplier() -> u32 {
    10
}
fn default_max_entries() -> u32 {
    500
}

impl Default for CacheSettings {
    fn default() -> Self {
        CacheSettings {
            cache_duration_ms: default_cache_duration(),
            max_age_multiplier: default_max_age_multiplier(),
            max_entries: default_max_entries(),
        }
    }
}

// =============================================================================
// Storage Settings
// =============================================================================

/// Locations of the durable store and the flat snapshot.
///
/// Unset paths resolve to the platform data directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_path: Option<PathBuf>,
}

// =============================================================================
// Main Engine Configuration
// =============================================================================

/// Complete engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Verbose logging (`DEBUG`).
    #[serde(default)]
    pub debug: bool,

    #[serde(default)]
    pub api: ApiSettings,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub cache: CacheSettings,

    #[serde(default)]
    pub storage: StorageSettings,
}

impl EngineConfig {
    /// Creates a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (engine.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        Self::load_with(config_path, |key| std::env::var(key).ok())
    }

    /// [`EngineConfig::load`] with the environment read through `lookup`.
    pub fn load_with(
        config_path: Option<PathBuf>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading engine config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_overrides(lookup);
        config.validate()?;

        Ok(config)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        let base = Url::parse(&self.api.base_url)
            .map_err(|e| SyncError::InvalidUrl(format!("{}: {}", self.api.base_url, e)))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(SyncError::InvalidUrl(format!(
                "Base URL must start with http:// or https://, got: {}",
                self.api.base_url
            )));
        }

        let intervals = [
            ("timeout_ms", self.api.timeout_ms),
            ("health_timeout_ms", self.api.health_timeout_ms),
            ("sync_interval_ms", self.sync.sync_interval_ms),
            ("min_sync_gap_ms", self.sync.min_sync_gap_ms),
            ("health_check_interval_ms", self.sync.health_check_interval_ms),
            ("retry_delay_ms", self.sync.retry_delay_ms),
            ("cache_duration_ms", self.cache.cache_duration_ms),
        ];
        if let Some((name, _)) = intervals.iter().find(|(_, value)| *value == 0) {
            return Err(SyncError::InvalidConfig(format!(
                "{} must be greater than 0",
                name
            )));
        }

        if self.sync.max_retries < 1 {
            return Err(SyncError::InvalidConfig(
                "max_retries must be at least 1".into(),
            ));
        }

        if self.sync.min_sync_gap_ms > self.sync.sync_interval_ms {
            return Err(SyncError::InvalidConfig(format!(
                "min_sync_gap_ms ({}) must not exceed sync_interval_ms ({})",
                self.sync.min_sync_gap_ms, self.sync.sync_interval_ms
            )));
        }

        if self.cache.max_age_multiplier < 1 {
            return Err(SyncError::InvalidConfig(
                "max_age_multiplier must be at least 1".into(),
            ));
        }

        if self.api.health_endpoints.is_empty() {
            return Err(SyncError::InvalidConfig(
                "health_endpoints must list at least one endpoint".into(),
            ));
        }

        Ok(())
    }

    /// Applies overrides from `lookup` (environment variable names).
    ///
    /// Unparseable values are logged and ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("COURIER_BASE_URL") {
            debug!(url = %url, "Overriding base URL from environment");
            self.api.base_url = url;
        }

        override_number(&lookup, "COURIER_TIMEOUT", &mut self.api.timeout_ms);
        override_number(&lookup, "COURIER_SYNC_INTERVAL", &mut self.sync.sync_interval_ms);
        override_number(
            &lookup,
            "COURIER_HEALTH_CHECK_INTERVAL",
            &mut self.sync.health_check_interval_ms,
        );
        override_number(&lookup, "COURIER_MAX_RETRIES", &mut self.sync.max_retries);
        override_number(&lookup, "COURIER_RETRY_DELAY", &mut self.sync.retry_delay_ms);
        override_number(&lookup, "COURIER_CACHE_DURATION", &mut self.cache.cache_duration_ms);

        if let Some(value) = lookup("COURIER_DEBUG") {
            match value.to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => self.debug = true,
                "0" | "false" | "no" | "off" => self.debug = false,
                _ => warn!(value = %value, "Unknown COURIER_DEBUG value in environment"),
            }
        }

        if let Some(path) = lookup("COURIER_DB_PATH") {
            self.storage.database_path = Some(PathBuf::from(path));
        }
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join("engine.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Parsed base URL. Only valid after [`EngineConfig::validate`].
    pub fn base_url(&self) -> SyncResult<Url> {
        Ok(Url::parse(&self.api.base_url)?)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.api.timeout_ms)
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_millis(self.api.health_timeout_ms)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync.sync_interval_ms)
    }

    pub fn min_sync_gap(&self) -> Duration {
        Duration::from_millis(self.sync.min_sync_gap_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.sync.health_check_interval_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.sync.retry_delay_ms)
    }

    /// Fresh lifetime of cached resources.
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache.cache_duration_ms)
    }

    /// Oldest age at which a cached resource may still be served stale.
    /// Saturates instead of overflowing on huge settings.
    pub fn cache_max_age(&self) -> Duration {
        self.cache_ttl().saturating_mul(self.cache.max_age_multiplier)
    }

    /// Resolved database path.
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| data_dir().join("courier.db"))
    }

    /// Resolved snapshot path.
    pub fn snapshot_path(&self) -> PathBuf {
        self.storage
            .snapshot_path
            .clone()
            .unwrap_or_else(|| data_dir().join("orders-snapshot.json"))
    }
}

fn override_number<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    target: &mut T,
) {
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse() {
        Ok(value) => {
            debug!(key, value = %raw, "Overriding setting from environment");
            *target = value;
        }
        Err(_) => warn!(key, value = %raw, "Ignoring unparseable environment override"),
    }
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("com", "courier", "dashboard")
}

fn data_dir() -> PathBuf {
    project_dirs()
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}
