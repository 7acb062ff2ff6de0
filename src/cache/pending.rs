//! Registry of staged keys awaiting upload

use dashmap::DashMap;
use std::path::{Path, PathBuf};

/// Concurrent map from cache key to staged-file path
#[derive(Debug, Default)]
pub struct PendingSet {
    entries: DashMap<String, PathBuf>,
}

impl PendingSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: &str, path: &Path) {
        self.entries.insert(name.to_string(), path.to_path_buf());
    }

    pub fn remove(&self, name: &str) {
        self.entries.remove(name);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy of the current entries, in no particular order
    ///
    /// Callers iterate the copy so no shard lock is held across an await.
    pub fn snapshot(&self) -> Vec<(String, PathBuf)> {
        self.entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}
