//! Error types for modcache
//!
//! All modules use `ModCacheResult<T>` as their return type.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for modcache operations
pub type ModCacheResult<T> = Result<T, ModCacheError>;

/// All errors that can occur in modcache
#[derive(Error, Debug)]
pub enum ModCacheError {
    // Object store errors
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Object store {operation} failed for {key}: {reason}")]
    Store {
        operation: &'static str,
        key: String,
        reason: String,
    },

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    // Staging errors
    #[error("Failed to create staging directory {path}: {source}")]
    StagingRootCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("{0}")]
    User(String),
}

impl ModCacheError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create an object store error
    pub fn store(operation: &'static str, key: impl Into<String>, reason: impl ToString) -> Self {
        Self::Store {
            operation,
            key: key.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the object store reported the object as absent
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Store { .. } | Self::Io { .. } | Self::Timeout(_)
        )
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::StagingRootCreate { .. } => {
                Some("Check that cache.local_cache_root exists and is writable")
            }
            Self::ConfigInvalid { .. } => Some("Run: modcache config init --force"),
            Self::Timeout(_) => Some("Raise redirect.fetch_timeout_secs or set it to 0"),
            _ => None,
        }
    }
}
