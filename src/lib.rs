//! modcache - write-behind cache for module download proxies
//!
//! Artifacts are staged on local disk when the proxy stores them and are
//! uploaded to an object store in the background. Reads are always served
//! from the object store, either streamed through the proxy or, for large
//! archives, by redirecting the client to a pre-signed URL.

pub mod backend;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod redirect;
pub mod store;

pub use backend::CacheBackend;
pub use cache::{CacheEntry, Cacher, WriteBehindCache};
pub use error::{ModCacheError, ModCacheResult};
pub use redirect::{RedirectPolicy, Route};
pub use store::{Bucket, ObjectStore};
