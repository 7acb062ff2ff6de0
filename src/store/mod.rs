//! Object store abstraction
//!
//! The remote store is the durable source of truth for cache hits. Concrete
//! clients (S3, MinIO, Kodo, ...) implement [`ObjectStore`]; a [`Bucket`]
//! binds a client to the bucket the cache writes into and is what the rest
//! of the crate passes around.

mod memory;

pub use memory::MemoryStore;

use crate::error::ModCacheResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncSeek};
use url::Url;

/// Metadata reported by a stat call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Object key as stored
    pub key: String,
    /// Body size in bytes
    pub size: u64,
    /// Store-reported modification time
    pub last_modified: DateTime<Utc>,
    /// Opaque entity tag; usually a hex content digest
    pub etag: String,
}

/// Options for a single upload
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutOptions {
    /// `Content-Type` recorded on the object
    pub content_type: Option<&'static str>,
    /// Whether the client may split the upload into parts
    pub allow_segmented: bool,
}

/// Streamed, seekable object body
pub trait ObjectReader: AsyncRead + AsyncSeek + Send + Unpin {}

impl<T: AsyncRead + AsyncSeek + Send + Unpin + ?Sized> ObjectReader for T {}

/// Remote object store interface
///
/// Implementations must report a missing object as
/// [`ModCacheError::NotFound`](crate::error::ModCacheError::NotFound) so
/// callers can tell a miss apart from a failure.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch object metadata
    async fn stat_object(&self, bucket: &str, key: &str) -> ModCacheResult<ObjectInfo>;

    /// Open the object body for reading
    async fn get_object(&self, bucket: &str, key: &str) -> ModCacheResult<Box<dyn ObjectReader>>;

    /// Upload `size` bytes read from `body`
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: &mut (dyn AsyncRead + Send + Unpin),
        size: u64,
        options: &PutOptions,
    ) -> ModCacheResult<()>;

    /// Generate a time-limited URL granting `method` access to the object
    async fn presign_url(
        &self,
        method: &str,
        bucket: &str,
        key: &str,
        ttl: Duration,
        extra_query: &[(&str, &str)],
    ) -> ModCacheResult<Url>;

    /// Human-readable backend name for display
    fn backend_name(&self) -> &'static str;
}

/// A store client bound to one bucket
#[derive(Clone)]
pub struct Bucket {
    client: Arc<dyn ObjectStore>,
    name: String,
}

impl Bucket {
    pub fn new(client: Arc<dyn ObjectStore>, name: impl Into<String>) -> Self {
        Self {
            client,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn stat(&self, key: &str) -> ModCacheResult<ObjectInfo> {
        self.client.stat_object(&self.name, key).await
    }

    pub async fn get(&self, key: &str) -> ModCacheResult<Box<dyn ObjectReader>> {
        self.client.get_object(&self.name, key).await
    }

    pub async fn put(
        &self,
        key: &str,
        body: &mut (dyn AsyncRead + Send + Unpin),
        size: u64,
        options: &PutOptions,
    ) -> ModCacheResult<()> {
        self.client
            .put_object(&self.name, key, body, size, options)
            .await
    }

    pub async fn presign(
        &self,
        method: &str,
        key: &str,
        ttl: Duration,
        extra_query: &[(&str, &str)],
    ) -> ModCacheResult<Url> {
        self.client
            .presign_url(method, &self.name, key, ttl, extra_query)
            .await
    }
}

impl fmt::Debug for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bucket")
            .field("backend", &self.client.backend_name())
            .field("name", &self.name)
            .finish()
    }
}
