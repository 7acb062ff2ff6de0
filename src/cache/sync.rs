//! Background upload of staged files
//!
//! The synchronizer polls the pending set on a fixed interval and moves each
//! staged file to the object store. An object that already exists remotely
//! is never overwritten: whoever uploaded first wins and every other writer
//! just drops its local copy. Failures stay pending until the next pass.

use crate::cache::key_extension;
use crate::cache::pending::PendingSet;
use crate::cache::staging::Staging;
use crate::store::{Bucket, PutOptions};
use std::fmt;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Result of one upload attempt for a pending key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// This process uploaded the object
    Uploaded,
    /// Another writer had already stored the object
    AlreadyPresent,
    /// The staged file disappeared; the entry was dropped
    Vanished,
    /// Left pending for the next pass
    Failed,
}

impl SyncOutcome {
    /// Whether the key left the pending set
    pub fn is_settled(&self) -> bool {
        !matches!(self, Self::Failed)
    }
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uploaded => write!(f, "uploaded"),
            Self::AlreadyPresent => write!(f, "already present"),
            Self::Vanished => write!(f, "vanished"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Content type recorded for a cache key, by suffix
pub fn content_type_for(name: &str) -> Option<&'static str> {
    match key_extension(name)? {
        "info" => Some("application/json; charset=utf-8"),
        "mod" => Some("text/plain; charset=utf-8"),
        "zip" => Some("application/zip"),
        _ => None,
    }
}

/// Uploads pending staged files until cancelled
pub struct Synchronizer {
    bucket: Bucket,
    staging: Arc<Staging>,
    pending: Arc<PendingSet>,
    interval: Duration,
    segmented_threshold: u64,
    shutdown: CancellationToken,
}

impl Synchronizer {
    pub fn new(
        bucket: Bucket,
        staging: Arc<Staging>,
        pending: Arc<PendingSet>,
        interval: Duration,
        segmented_threshold: u64,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            bucket,
            staging,
            pending,
            interval,
            segmented_threshold,
            shutdown,
        }
    }

    /// Sleep-then-scan until the shutdown token fires
    pub async fn run(self) {
        debug!("Synchronizer started (interval {:?})", self.interval);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
            self.run_cycle().await;
        }
        debug!("Synchronizer stopped");
    }

    /// One pass over every pending key
    pub async fn run_cycle(&self) -> Vec<(String, SyncOutcome)> {
        let mut outcomes = Vec::new();
        for (name, path) in self.pending.snapshot() {
            if self.shutdown.is_cancelled() {
                break;
            }
            let outcome = self.sync_one(&name, &path).await;
            debug!("{}: {}", name, outcome);
            outcomes.push((name, outcome));
        }
        outcomes
    }

    /// Try to move one staged file to the store
    pub async fn sync_one(&self, name: &str, path: &Path) -> SyncOutcome {
        let mut file = match File::open(path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                self.pending.remove(name);
                return SyncOutcome::Vanished;
            }
            Err(e) => {
                debug!("Cannot open staged file {}: {}", path.display(), e);
                return SyncOutcome::Failed;
            }
        };

        let size = match file.metadata().await {
            Ok(metadata) => metadata.len(),
            Err(e) => {
                debug!("Cannot stat staged file {}: {}", path.display(), e);
                return SyncOutcome::Failed;
            }
        };

        // A stalled stat must not hold up shutdown; uploads are left to finish
        let stat = tokio::select! {
            _ = self.shutdown.cancelled() => return SyncOutcome::Failed,
            stat = self.bucket.stat(name) => stat,
        };
        match stat {
            Ok(_) => {
                drop(file);
                self.settle(name, path).await;
                return SyncOutcome::AlreadyPresent;
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                debug!("{}", e);
                return SyncOutcome::Failed;
            }
        }

        let options = PutOptions {
            content_type: content_type_for(name),
            allow_segmented: size >= self.segmented_threshold,
        };
        match self.bucket.put(name, &mut file, size, &options).await {
            Ok(()) => {
                drop(file);
                self.settle(name, path).await;
                SyncOutcome::Uploaded
            }
            Err(e) => {
                debug!("{}", e);
                SyncOutcome::Failed
            }
        }
    }

    async fn settle(&self, name: &str, path: &Path) {
        self.pending.remove(name);
        self.staging.remove(path).await;
    }
}

impl fmt::Debug for Synchronizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Synchronizer")
            .field("bucket", &self.bucket)
            .field("interval", &self.interval)
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}
