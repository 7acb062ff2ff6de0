//! Automatic redirect of large artifacts to the object store
//!
//! Module zips are often large and immutable, so once one is in the object
//! store it is cheaper to send the client a pre-signed URL than to stream it
//! through the proxy. Small objects are not worth the extra round-trip.

use crate::cache::key_extension;
use crate::config::RedirectConfig;
use crate::error::{ModCacheError, ModCacheResult};
use crate::store::Bucket;
use std::future::Future;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Lifetime of a pre-signed redirect URL
pub const PRESIGN_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Cache directive attached to redirected responses, matching [`PRESIGN_TTL`]
pub const REDIRECT_CACHE_CONTROL: &str = "public, max-age=604800";

/// How a request should be served
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Hand the request to the module proxy engine unchanged
    Proxy,
    /// Redirect the client to this pre-signed object store URL
    Redirect(Url),
}

/// Reports whether the cache name refers to an artifact that may be
/// redirected: a version zip outside the checksum database namespace.
pub fn is_auto_redirectable(name: &str) -> bool {
    !name.starts_with("sumdb/")
        && name.contains("/@v/")
        && key_extension(name) == Some("zip")
}

/// Cache name for a raw request path
///
/// Resolves `.`, `..` and repeated slashes lexically and drops the leading
/// slash, so `/a/./b//c` and `a/x/../b/c` both map to `a/b/c`.
pub fn cache_name(raw_path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in raw_path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    segments.join("/")
}

fn is_read_method(method: &str) -> bool {
    method.eq_ignore_ascii_case("GET") || method.eq_ignore_ascii_case("HEAD")
}

/// Decides between proxying and redirecting read requests
#[derive(Debug, Clone)]
pub struct RedirectPolicy {
    bucket: Bucket,
    config: RedirectConfig,
}

impl RedirectPolicy {
    pub fn new(bucket: Bucket, config: &RedirectConfig) -> Self {
        Self {
            bucket,
            config: config.clone(),
        }
    }

    /// Route a request
    ///
    /// Store failures other than a missing object are returned as errors;
    /// the caller decides whether to fall back to proxying.
    pub async fn route(&self, method: &str, raw_path: &str) -> ModCacheResult<Route> {
        if !self.config.auto_redirect || !is_read_method(method) {
            return Ok(Route::Proxy);
        }

        let name = cache_name(raw_path);
        if !is_auto_redirectable(&name) {
            return Ok(Route::Proxy);
        }

        with_deadline(self.config.fetch_timeout(), self.resolve(method, &name)).await
    }

    async fn resolve(&self, method: &str, name: &str) -> ModCacheResult<Route> {
        let info = match self.bucket.stat(name).await {
            Ok(info) => info,
            Err(e) if e.is_not_found() => {
                debug!("{} not in store yet, proxying", name);
                return Ok(Route::Proxy);
            }
            Err(e) => return Err(e),
        };

        if info.size < self.config.auto_redirect_min_size {
            return Ok(Route::Proxy);
        }

        let url = self
            .bucket
            .presign(
                &method.to_ascii_uppercase(),
                &info.key,
                PRESIGN_TTL,
                &[("response-cache-control", REDIRECT_CACHE_CONTROL)],
            )
            .await?;
        debug!("Redirecting {} ({} bytes)", name, info.size);
        Ok(Route::Redirect(url))
    }
}

async fn with_deadline<T>(
    deadline: Option<Duration>,
    fut: impl Future<Output = ModCacheResult<T>>,
) -> ModCacheResult<T> {
    match deadline {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| ModCacheError::Timeout(limit))?,
        None => fut.await,
    }
}
