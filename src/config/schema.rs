//! Configuration schema for modcache
//!
//! Configuration is stored at `~/.config/modcache/config.toml`

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Object store settings
    pub store: StoreConfig,

    /// Local staging and synchronizer settings
    pub cache: CacheConfig,

    /// Automatic redirect settings
    pub redirect: RedirectConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log format: "text" or "json"
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_format: "text".to_string(),
        }
    }
}

/// Object store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Bucket holding cached artifacts
    pub bucket: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            bucket: "modcache".to_string(),
        }
    }
}

/// Local staging and synchronizer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Parent directory for the staging area (defaults to the system temp dir)
    pub local_cache_root: Option<PathBuf>,

    /// Pause between synchronizer passes in milliseconds
    pub sync_interval_ms: u64,

    /// Uploads at or above this size may use segmented transfer
    pub segmented_threshold_bytes: u64,

    /// Attempts at removing the staging area on shutdown
    pub shutdown_retries: u32,

    /// Pause between removal attempts in milliseconds
    pub shutdown_retry_interval_ms: u64,
}

impl CacheConfig {
    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }

    pub fn shutdown_retry_interval(&self) -> Duration {
        Duration::from_millis(self.shutdown_retry_interval_ms)
    }

    /// Directory the staging area is created in
    pub fn staging_parent(&self) -> PathBuf {
        self.local_cache_root
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            local_cache_root: None,
            sync_interval_ms: 1000,
            segmented_threshold_bytes: 256 << 20,
            shutdown_retries: 60,
            shutdown_retry_interval_ms: 1000,
        }
    }
}

/// Automatic redirect settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RedirectConfig {
    /// Redirect eligible reads to pre-signed object store URLs
    pub auto_redirect: bool,

    /// Objects smaller than this are always proxied
    pub auto_redirect_min_size: u64,

    /// Deadline for store round-trips made while routing (0 = none)
    pub fetch_timeout_secs: u64,
}

impl RedirectConfig {
    pub fn fetch_timeout(&self) -> Option<Duration> {
        (self.fetch_timeout_secs > 0).then(|| Duration::from_secs(self.fetch_timeout_secs))
    }
}
