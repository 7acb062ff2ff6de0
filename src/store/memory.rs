//! In-process object store
//!
//! Keeps objects in memory. Used for local development and as the remote
//! stand-in throughout the test suite; it can be switched offline to
//! simulate an unreachable store.

use super::{ObjectInfo, ObjectReader, ObjectStore, PutOptions};
use crate::error::{ModCacheError, ModCacheResult};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::RwLock;
use url::Url;

const DEFAULT_ENDPOINT: &str = "memory://objects/";

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    last_modified: DateTime<Utc>,
    etag: String,
    options: PutOptions,
}

/// Object store backed by a hash map
#[derive(Debug)]
pub struct MemoryStore {
    objects: RwLock<HashMap<(String, String), StoredObject>>,
    endpoint: Url,
    offline: AtomicBool,
    puts: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        let endpoint = Url::parse(DEFAULT_ENDPOINT).expect("default endpoint is a valid URL");
        Self::with_endpoint(endpoint)
    }

    /// Create a store whose pre-signed URLs are rooted at `endpoint`
    pub fn with_endpoint(endpoint: Url) -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            endpoint,
            offline: AtomicBool::new(false),
            puts: AtomicUsize::new(0),
        }
    }

    /// Make every call fail with a store error until switched back
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of successful `put_object` calls
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    /// Seed an object directly, bypassing `put_object`
    pub async fn insert(&self, bucket: &str, key: &str, data: impl Into<Bytes>) -> ObjectInfo {
        let data = data.into();
        let etag = content_etag(&data);
        self.insert_with_etag(bucket, key, data, &etag).await
    }

    /// Seed an object with an explicit entity tag
    pub async fn insert_with_etag(
        &self,
        bucket: &str,
        key: &str,
        data: impl Into<Bytes>,
        etag: &str,
    ) -> ObjectInfo {
        let object = StoredObject {
            data: data.into(),
            last_modified: Utc::now(),
            etag: etag.to_string(),
            options: PutOptions::default(),
        };
        let info = info_for(key, &object);
        self.objects
            .write()
            .await
            .insert((bucket.to_string(), key.to_string()), object);
        info
    }

    /// Body of a stored object
    pub async fn contents(&self, bucket: &str, key: &str) -> Option<Bytes> {
        self.objects
            .read()
            .await
            .get(&(bucket.to_string(), key.to_string()))
            .map(|o| o.data.clone())
    }

    /// Options the object was uploaded with
    pub async fn put_options(&self, bucket: &str, key: &str) -> Option<PutOptions> {
        self.objects
            .read()
            .await
            .get(&(bucket.to_string(), key.to_string()))
            .map(|o| o.options.clone())
    }

    /// Number of stored objects across all buckets
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn check_online(&self, operation: &'static str, key: &str) -> ModCacheResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(ModCacheError::store(operation, key, "store unreachable"));
        }
        Ok(())
    }

    async fn lookup(
        &self,
        operation: &'static str,
        bucket: &str,
        key: &str,
    ) -> ModCacheResult<StoredObject> {
        self.check_online(operation, key)?;
        self.objects
            .read()
            .await
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| ModCacheError::NotFound(key.to_string()))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn content_etag(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

fn info_for(key: &str, object: &StoredObject) -> ObjectInfo {
    ObjectInfo {
        key: key.to_string(),
        size: object.data.len() as u64,
        last_modified: object.last_modified,
        etag: object.etag.clone(),
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn stat_object(&self, bucket: &str, key: &str) -> ModCacheResult<ObjectInfo> {
        let object = self.lookup("stat", bucket, key).await?;
        Ok(info_for(key, &object))
    }

    async fn get_object(&self, bucket: &str, key: &str) -> ModCacheResult<Box<dyn ObjectReader>> {
        let object = self.lookup("get", bucket, key).await?;
        Ok(Box::new(Cursor::new(object.data)))
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: &mut (dyn AsyncRead + Send + Unpin),
        size: u64,
        options: &PutOptions,
    ) -> ModCacheResult<()> {
        self.check_online("put", key)?;

        let mut data = Vec::with_capacity(size as usize);
        body.read_to_end(&mut data)
            .await
            .map_err(|e| ModCacheError::store("put", key, e))?;
        if data.len() as u64 != size {
            return Err(ModCacheError::store(
                "put",
                key,
                format!("expected {} bytes, read {}", size, data.len()),
            ));
        }

        let object = StoredObject {
            etag: content_etag(&data),
            data: Bytes::from(data),
            last_modified: Utc::now(),
            options: options.clone(),
        };
        self.objects
            .write()
            .await
            .insert((bucket.to_string(), key.to_string()), object);
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn presign_url(
        &self,
        method: &str,
        bucket: &str,
        key: &str,
        ttl: Duration,
        extra_query: &[(&str, &str)],
    ) -> ModCacheResult<Url> {
        self.check_online("presign", key)?;

        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| ModCacheError::store("presign", key, "endpoint cannot be a base URL"))?
            .pop_if_empty()
            .push(bucket)
            .extend(key.split('/'));
        url.query_pairs_mut()
            .append_pair("X-Method", method)
            .append_pair("X-Expires", &ttl.as_secs().to_string())
            .extend_pairs(extra_query);
        Ok(url)
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
