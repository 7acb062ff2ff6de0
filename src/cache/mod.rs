//! Write-behind module cache
//!
//! `set` stages content on local disk and returns; a background
//! [`Synchronizer`] later moves it into the object store. `get` only ever
//! reads from the object store, so a half-written staged file can never be
//! served.
//!
//! # Key lifecycle
//!
//! | State | Where | Description |
//! |-------|-------|-------------|
//! | Miss | nowhere | `get` returns `NotFound`, engine fetches and calls `set` |
//! | Staged | disk + pending set | Waiting for the next synchronizer pass |
//! | Stored | object store | Staged copy removed; served by `get` or redirect |

pub mod pending;
pub mod reader;
pub mod staging;
pub mod sync;

pub use pending::PendingSet;
pub use reader::{checksum_from_etag, CacheEntry};
pub use staging::{staged_file_name, StageOutcome, Staging};
pub use sync::{content_type_for, SyncOutcome, Synchronizer};

use crate::config::CacheConfig;
use crate::error::ModCacheResult;
use crate::store::Bucket;
use async_trait::async_trait;
use std::path::Path;
use std::sync::{Arc, Mutex, Once, PoisonError};
use tokio::io::AsyncRead;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Extension of the last segment of a slash-separated cache key
///
/// Keys always use `/`, whatever the host platform. A segment that is only
/// an extension (`.zip`) still counts.
pub fn key_extension(name: &str) -> Option<&str> {
    let segment = name.rsplit_once('/').map_or(name, |(_, last)| last);
    segment.rsplit_once('.').map(|(_, ext)| ext)
}

/// Storage contract expected by the module proxy engine
///
/// `get` must report a miss as
/// [`ModCacheError::NotFound`](crate::error::ModCacheError::NotFound); the
/// engine then fetches the artifact upstream and hands it to `set`.
#[async_trait]
pub trait Cacher: Send + Sync {
    /// Open a cached artifact
    async fn get(&self, name: &str) -> ModCacheResult<CacheEntry>;

    /// Store an artifact
    async fn set(&self, name: &str, content: &mut (dyn AsyncRead + Send + Unpin))
        -> ModCacheResult<()>;
}

/// Cacher that stages locally and uploads in the background
pub struct WriteBehindCache {
    bucket: Bucket,
    staging: Arc<Staging>,
    pending: Arc<PendingSet>,
    config: CacheConfig,
    shutdown: CancellationToken,
    sync_started: Once,
    sync_task: Mutex<Option<JoinHandle<()>>>,
}

impl WriteBehindCache {
    /// Create the cache and its staging directory
    ///
    /// Fails if the staging directory cannot be created; the cache is
    /// unusable without it.
    pub async fn new(bucket: Bucket, config: &CacheConfig) -> ModCacheResult<Self> {
        let staging = Staging::create(&config.staging_parent()).await?;
        Ok(Self {
            bucket,
            staging: Arc::new(staging),
            pending: Arc::new(PendingSet::new()),
            config: config.clone(),
            shutdown: CancellationToken::new(),
            sync_started: Once::new(),
            sync_task: Mutex::new(None),
        })
    }

    pub fn staging_root(&self) -> &Path {
        self.staging.root()
    }

    /// Number of keys waiting for upload
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// A synchronizer sharing this cache's state
    pub fn synchronizer(&self) -> Synchronizer {
        Synchronizer::new(
            self.bucket.clone(),
            self.staging.clone(),
            self.pending.clone(),
            self.config.sync_interval(),
            self.config.segmented_threshold_bytes,
            self.shutdown.child_token(),
        )
    }

    fn ensure_synchronizer(&self) {
        self.sync_started.call_once(|| {
            let handle = tokio::spawn(self.synchronizer().run());
            *self
                .sync_task
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(handle);
        });
    }

    /// Stop the synchronizer and remove the staging directory
    ///
    /// An upload in flight is allowed to finish first. Anything still
    /// pending afterwards is discarded with the staging directory.
    pub async fn shutdown(&self) -> ModCacheResult<()> {
        self.shutdown.cancel();

        let handle = self
            .sync_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                debug!("Synchronizer task ended abnormally: {}", e);
            }
        }

        if !self.pending.is_empty() {
            info!(
                "Discarding {} staged artifacts not yet uploaded",
                self.pending.len()
            );
        }

        self.staging
            .remove_root(
                self.config.shutdown_retries,
                self.config.shutdown_retry_interval(),
            )
            .await?;
        info!("Removed staging directory {}", self.staging.root().display());
        Ok(())
    }
}

#[async_trait]
impl Cacher for WriteBehindCache {
    async fn get(&self, name: &str) -> ModCacheResult<CacheEntry> {
        let info = self.bucket.stat(name).await?;
        let checksum = checksum_from_etag(&info.etag);
        let body = self.bucket.get(&info.key).await?;
        Ok(CacheEntry::new(body, info.size, info.last_modified, checksum))
    }

    async fn set(
        &self,
        name: &str,
        content: &mut (dyn AsyncRead + Send + Unpin),
    ) -> ModCacheResult<()> {
        self.ensure_synchronizer();

        if let StageOutcome::Staged(path) = self.staging.stage(name, content).await? {
            self.pending.insert(name, &path);
        }
        Ok(())
    }
}

impl std::fmt::Debug for WriteBehindCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteBehindCache")
            .field("bucket", &self.bucket)
            .field("staging", &self.staging.root())
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModCacheError;
    use crate::store::{MemoryStore, ObjectInfo, ObjectReader, ObjectStore, PutOptions};
    use md5::{Digest, Md5};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    const BUCKET: &str = "goproxy";

    /// Config whose background loop never fires during a test
    fn manual_config(root: &Path) -> CacheConfig {
        CacheConfig {
            local_cache_root: Some(root.to_path_buf()),
            sync_interval_ms: 3_600_000,
            shutdown_retries: 3,
            shutdown_retry_interval_ms: 1,
            ..CacheConfig::default()
        }
    }

    async fn test_cache(store: &Arc<MemoryStore>, root: &Path) -> WriteBehindCache {
        WriteBehindCache::new(Bucket::new(store.clone(), BUCKET), &manual_config(root))
            .await
            .unwrap()
    }

    async fn read_all(mut entry: CacheEntry) -> Vec<u8> {
        let mut data = Vec::new();
        entry.read_to_end(&mut data).await.unwrap();
        data
    }

    #[test]
    fn key_extension_uses_last_segment() {
        assert_eq!(key_extension("example.com/mod/@v/v1.0.0.zip"), Some("zip"));
        assert_eq!(key_extension("example.com/mod/@v/.zip"), Some("zip"));
        assert_eq!(key_extension("example.com/v1.2/@v/list"), None);
        assert_eq!(key_extension("v1.0.0.info"), Some("info"));
        assert_eq!(key_extension("a\\b.mod"), Some("mod"));
        assert_eq!(key_extension("sumdb/sum.golang.org/latest"), None);
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let cache = test_cache(&store, temp.path()).await;

        let err = cache.get("example.com/mod/@v/v9.9.9.info").await.unwrap_err();
        assert!(matches!(err, ModCacheError::NotFound(_)));
    }

    #[tokio::test]
    async fn get_propagates_store_errors() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let cache = test_cache(&store, temp.path()).await;
        store.set_offline(true);

        let err = cache.get("example.com/mod/@v/v1.0.0.info").await.unwrap_err();
        assert!(matches!(err, ModCacheError::Store { .. }));
    }

    #[tokio::test]
    async fn get_uses_digest_etag_as_checksum() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let cache = test_cache(&store, temp.path()).await;
        let info = store.insert(BUCKET, "a/@v/v1.0.0.mod", "module a\n").await;

        let entry = cache.get("a/@v/v1.0.0.mod").await.unwrap();

        assert_eq!(entry.checksum(), Md5::digest(b"module a\n").as_slice());
        assert_eq!(entry.mod_time(), info.last_modified);
        assert_eq!(entry.size(), 9);
        assert_eq!(read_all(entry).await, b"module a\n");
    }

    #[tokio::test]
    async fn get_tolerates_malformed_etag() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let cache = test_cache(&store, temp.path()).await;
        let etag = "d41d8cd98f00b204e9800998ecf8427e-12";
        store
            .insert_with_etag(BUCKET, "a/@v/v1.0.0.zip", "zip", etag)
            .await;

        let entry = cache.get("a/@v/v1.0.0.zip").await.unwrap();

        assert_eq!(entry.checksum(), Md5::digest(etag.as_bytes()).as_slice());
    }

    #[tokio::test]
    async fn set_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let cache = test_cache(&store, temp.path()).await;
        let name = "example.com/mod/@v/v1.0.0.zip";

        let mut first: &[u8] = b"first";
        let mut second: &[u8] = b"second";
        cache.set(name, &mut first).await.unwrap();
        cache.set(name, &mut second).await.unwrap();

        assert_eq!(cache.pending_len(), 1);
        assert_eq!(std::fs::read_dir(cache.staging_root()).unwrap().count(), 1);
        assert_eq!(
            std::fs::read(cache.staging.path_for(name)).unwrap(),
            b"first"
        );
        cache.shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_sets_stage_once() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(test_cache(&store, temp.path()).await);
        let name = "example.com/mod/@v/v1.0.0.info";

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move {
                    let mut content: &[u8] = br#"{"Version":"v1.0.0"}"#;
                    cache.set(name, &mut content).await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(cache.pending_len(), 1);
        assert_eq!(std::fs::read_dir(cache.staging_root()).unwrap().count(), 1);
        cache.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn set_then_sync_converges() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let cache = test_cache(&store, temp.path()).await;
        let name = "example.com/mod/@v/v1.0.0.mod";

        let mut content: &[u8] = b"module example.com/mod\n";
        cache.set(name, &mut content).await.unwrap();
        assert!(cache.get(name).await.unwrap_err().is_not_found());

        let outcomes = cache.synchronizer().run_cycle().await;

        assert_eq!(outcomes, vec![(name.to_string(), SyncOutcome::Uploaded)]);
        assert!(!cache.staging.path_for(name).exists());
        assert_eq!(cache.pending_len(), 0);
        let entry = cache.get(name).await.unwrap();
        assert_eq!(read_all(entry).await, b"module example.com/mod\n");
        cache.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn background_synchronizer_uploads() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let config = CacheConfig {
            sync_interval_ms: 10,
            ..manual_config(temp.path())
        };
        let cache = WriteBehindCache::new(Bucket::new(store.clone(), BUCKET), &config)
            .await
            .unwrap();
        let name = "example.com/mod/@v/v1.0.0.zip";

        let mut content: &[u8] = b"PK\x03\x04";
        cache.set(name, &mut content).await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while cache.pending_len() > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert!(cache.get(name).await.is_ok());
        assert!(!cache.staging.path_for(name).exists());
        cache.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn independent_writers_upload_once() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let a = test_cache(&store, temp.path()).await;
        let b = test_cache(&store, temp.path()).await;
        let name = "example.com/mod/@v/v1.0.0.zip";

        let mut from_a: &[u8] = b"zip bytes";
        let mut from_b: &[u8] = b"zip bytes";
        a.set(name, &mut from_a).await.unwrap();
        b.set(name, &mut from_b).await.unwrap();

        let outcome_a = a.synchronizer().run_cycle().await;
        let outcome_b = b.synchronizer().run_cycle().await;

        assert_eq!(outcome_a, vec![(name.to_string(), SyncOutcome::Uploaded)]);
        assert_eq!(
            outcome_b,
            vec![(name.to_string(), SyncOutcome::AlreadyPresent)]
        );
        assert_eq!(store.put_count(), 1);
        assert_eq!(store.len().await, 1);
        assert!(!a.staging.path_for(name).exists());
        assert!(!b.staging.path_for(name).exists());
        a.shutdown().await.unwrap();
        b.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_removes_staging_root() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let cache = test_cache(&store, temp.path()).await;
        store.set_offline(true);

        let mut content: &[u8] = b"stuck";
        cache.set("a/@v/v1.0.0.zip", &mut content).await.unwrap();
        let root = cache.staging_root().to_path_buf();
        assert!(root.exists());

        cache.shutdown().await.unwrap();

        assert!(!root.exists());
    }

    #[tokio::test]
    async fn poisoned_task_slot_still_tracks_synchronizer() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(test_cache(&store, temp.path()).await);

        let holder = cache.clone();
        let _ = std::thread::spawn(move || {
            let _slot = holder.sync_task.lock().unwrap();
            panic!("poison the task slot");
        })
        .join();
        assert!(cache.sync_task.is_poisoned());

        let mut content: &[u8] = b"module a\n";
        cache.set("a/@v/v1.0.0.mod", &mut content).await.unwrap();
        assert!(cache
            .sync_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some());

        cache.shutdown().await.unwrap();
        assert!(cache
            .sync_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none());
    }

    /// Store whose stat never answers
    struct StalledStore;

    #[async_trait]
    impl ObjectStore for StalledStore {
        async fn stat_object(&self, _bucket: &str, _key: &str) -> ModCacheResult<ObjectInfo> {
            std::future::pending().await
        }

        async fn get_object(
            &self,
            _bucket: &str,
            key: &str,
        ) -> ModCacheResult<Box<dyn ObjectReader>> {
            Err(ModCacheError::store("get", key, "stalled"))
        }

        async fn put_object(
            &self,
            _bucket: &str,
            key: &str,
            _body: &mut (dyn AsyncRead + Send + Unpin),
            _size: u64,
            _options: &PutOptions,
        ) -> ModCacheResult<()> {
            Err(ModCacheError::store("put", key, "stalled"))
        }

        async fn presign_url(
            &self,
            _method: &str,
            _bucket: &str,
            key: &str,
            _ttl: Duration,
            _extra_query: &[(&str, &str)],
        ) -> ModCacheResult<url::Url> {
            Err(ModCacheError::store("presign", key, "stalled"))
        }

        fn backend_name(&self) -> &'static str {
            "stalled"
        }
    }

    #[tokio::test]
    async fn shutdown_is_not_blocked_by_stalled_stat() {
        let temp = TempDir::new().unwrap();
        let config = CacheConfig {
            sync_interval_ms: 10,
            ..manual_config(temp.path())
        };
        let cache = WriteBehindCache::new(Bucket::new(Arc::new(StalledStore), BUCKET), &config)
            .await
            .unwrap();

        let mut content: &[u8] = b"PK\x03\x04";
        cache
            .set("example.com/mod/@v/v1.0.0.zip", &mut content)
            .await
            .unwrap();
        // Let the synchronizer reach the stalled stat
        tokio::time::sleep(Duration::from_millis(100)).await;
        let root = cache.staging_root().to_path_buf();

        tokio::time::timeout(Duration::from_secs(3), cache.shutdown())
            .await
            .expect("shutdown should not wait on a stalled stat")
            .unwrap();

        assert!(!root.exists());
    }

    #[tokio::test]
    async fn unwritable_staging_parent_is_fatal() {
        let temp = TempDir::new().unwrap();
        let blocker = temp.path().join("file");
        std::fs::write(&blocker, b"").unwrap();
        let store = Arc::new(MemoryStore::new());

        let err = WriteBehindCache::new(Bucket::new(store, BUCKET), &manual_config(&blocker))
            .await
            .unwrap_err();

        assert!(matches!(err, ModCacheError::StagingRootCreate { .. }));
    }
}
