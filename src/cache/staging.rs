//! Local staging area for content awaiting upload
//!
//! Staged files are named by the SHA256 of the cache key, never of the
//! content, so a key maps to exactly one path. Creation is serialized by a
//! narrow lock around create-exclusive; the content copy runs outside it.

use crate::error::{ModCacheError, ModCacheResult};
use sha2::{Digest, Sha256};
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const STAGING_DIR_PREFIX: &str = "modcache-staging";

/// Result of staging a cache key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    /// Content was written to this path
    Staged(PathBuf),
    /// A file for the key already exists (finished or still being written)
    AlreadyStaged,
}

/// Private directory holding staged files
#[derive(Debug)]
pub struct Staging {
    root: PathBuf,
    lock: Mutex<()>,
}

/// Staged file name for a cache key: 64 lowercase hex chars
pub fn staged_file_name(name: &str) -> String {
    hex::encode(Sha256::digest(name.as_bytes()))
}

impl Staging {
    /// Create a fresh, uniquely named staging directory under `parent`
    pub async fn create(parent: &Path) -> ModCacheResult<Self> {
        let root = parent.join(format!("{}-{}", STAGING_DIR_PREFIX, uuid::Uuid::new_v4()));
        fs::create_dir_all(&root)
            .await
            .map_err(|e| ModCacheError::StagingRootCreate {
                path: root.clone(),
                source: e,
            })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o700);
            std::fs::set_permissions(&root, perms).map_err(|e| {
                ModCacheError::StagingRootCreate {
                    path: root.clone(),
                    source: e,
                }
            })?;
        }

        info!("Staging directory: {}", root.display());
        Ok(Self {
            root,
            lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Deterministic staged-file path for a cache key
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(staged_file_name(name))
    }

    /// Copy `content` into the staged file for `name`
    ///
    /// Returns [`StageOutcome::AlreadyStaged`] without touching `content` if
    /// the key is already staged. A failed copy removes the partial file.
    pub async fn stage(
        &self,
        name: &str,
        content: &mut (dyn AsyncRead + Send + Unpin),
    ) -> ModCacheResult<StageOutcome> {
        let path = self.path_for(name);

        let file = {
            let _guard = self.lock.lock().await;
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => file,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    debug!("{} already staged", name);
                    return Ok(StageOutcome::AlreadyStaged);
                }
                Err(e) => {
                    return Err(ModCacheError::io(
                        format!("creating staged file {}", path.display()),
                        e,
                    ))
                }
            }
        };

        if let Err(e) = copy_into(file, content).await {
            let _ = fs::remove_file(&path).await;
            return Err(ModCacheError::io(format!("staging {}", name), e));
        }

        debug!("Staged {} at {}", name, path.display());
        Ok(StageOutcome::Staged(path))
    }

    /// Delete a staged file, ignoring files that are already gone
    pub async fn remove(&self, path: &Path) {
        let _guard = self.lock.lock().await;
        match fs::remove_file(path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => debug!("Failed to remove staged file {}: {}", path.display(), e),
        }
    }

    /// Recursively remove the staging root, retrying transient failures
    pub async fn remove_root(&self, attempts: u32, interval: Duration) -> ModCacheResult<()> {
        remove_dir_with_retries(&self.root, attempts, interval, |path| async move {
            fs::remove_dir_all(path).await
        })
        .await
    }
}

async fn copy_into(
    mut file: fs::File,
    content: &mut (dyn AsyncRead + Send + Unpin),
) -> std::io::Result<()> {
    tokio::io::copy(content, &mut file).await?;
    file.flush().await?;
    file.sync_all().await
}

/// Run `remove` until it succeeds or `attempts` are used up
///
/// A directory that no longer exists counts as removed.
pub(crate) async fn remove_dir_with_retries<F, Fut>(
    path: &Path,
    attempts: u32,
    interval: Duration,
    mut remove: F,
) -> ModCacheResult<()>
where
    F: FnMut(PathBuf) -> Fut,
    Fut: Future<Output = std::io::Result<()>>,
{
    let attempts = attempts.max(1);
    let mut last_error = None;

    for attempt in 1..=attempts {
        match remove(path.to_path_buf()).await {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                debug!(
                    attempt,
                    "Failed to remove {}: {}",
                    path.display(),
                    e
                );
                last_error = Some(e);
            }
        }

        if attempt < attempts {
            tokio::time::sleep(interval).await;
        }
    }

    warn!(
        "Giving up on removing {} after {} attempts",
        path.display(),
        attempts
    );
    Err(ModCacheError::io(
        format!("removing {}", path.display()),
        last_error.unwrap_or_else(|| std::io::Error::other("removal failed")),
    ))
}
