//! Cache backend assembled from configuration
//!
//! Binds a store client to `store.bucket` and builds the write-behind cache
//! and the redirect policy on top of it. Startup order is config, client,
//! cache (creates the staging directory), then policy.

use crate::cache::WriteBehindCache;
use crate::config::Config;
use crate::error::ModCacheResult;
use crate::redirect::RedirectPolicy;
use crate::store::{Bucket, ObjectStore};
use std::sync::Arc;
use tracing::info;

/// The cache and redirect policy sharing one bucket
#[derive(Debug)]
pub struct CacheBackend {
    bucket: Bucket,
    cache: Arc<WriteBehindCache>,
    redirect: RedirectPolicy,
}

impl CacheBackend {
    /// Build the backend for `config` on top of `client`
    ///
    /// Fails when the staging directory cannot be created.
    pub async fn from_config(
        config: &Config,
        client: Arc<dyn ObjectStore>,
    ) -> ModCacheResult<Self> {
        let bucket = Bucket::new(client, config.store.bucket.clone());
        let cache = WriteBehindCache::new(bucket.clone(), &config.cache).await?;
        let redirect = RedirectPolicy::new(bucket.clone(), &config.redirect);

        info!(
            "Cache backend ready: {:?}, staging in {}",
            bucket,
            cache.staging_root().display()
        );

        Ok(Self {
            bucket,
            cache: Arc::new(cache),
            redirect,
        })
    }

    pub fn bucket(&self) -> &Bucket {
        &self.bucket
    }

    /// Cache handle for the proxy engine
    pub fn cache(&self) -> &Arc<WriteBehindCache> {
        &self.cache
    }

    pub fn redirect(&self) -> &RedirectPolicy {
        &self.redirect
    }

    /// Stop background uploads and remove the staging directory
    pub async fn shutdown(&self) -> ModCacheResult<()> {
        self.cache.shutdown().await
    }
}
