//! Read view over a cached object
//!
//! A [`CacheEntry`] is the object store body plus the metadata the module
//! proxy engine needs for conditional responses: modification time and a
//! checksum.

use crate::store::ObjectReader;
use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncSeek, ReadBuf};

/// Checksum length in bytes (MD5)
pub const CHECKSUM_LEN: usize = 16;

/// Derive a checksum from an entity tag
///
/// Tags that are a hex MD5 digest decode to that digest. Anything else
/// (multipart tags, vendor-specific formats) is hashed as a string, which
/// is a stable stand-in but says nothing about the content itself.
pub fn checksum_from_etag(etag: &str) -> Vec<u8> {
    match hex::decode(etag) {
        Ok(digest) if digest.len() == CHECKSUM_LEN => digest,
        _ => Md5::digest(etag.as_bytes()).to_vec(),
    }
}

/// Streamed, seekable cached object
pub struct CacheEntry {
    body: Box<dyn ObjectReader>,
    size: u64,
    mod_time: DateTime<Utc>,
    checksum: Vec<u8>,
}

impl CacheEntry {
    pub fn new(
        body: Box<dyn ObjectReader>,
        size: u64,
        mod_time: DateTime<Utc>,
        checksum: Vec<u8>,
    ) -> Self {
        Self {
            body,
            size,
            mod_time,
            checksum,
        }
    }

    /// Store-reported modification time
    pub fn mod_time(&self) -> DateTime<Utc> {
        self.mod_time
    }

    pub fn checksum(&self) -> &[u8] {
        &self.checksum
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

impl AsyncRead for CacheEntry {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.body).poll_read(cx, buf)
    }
}

impl AsyncSeek for CacheEntry {
    fn start_seek(mut self: Pin<&mut Self>, position: io::SeekFrom) -> io::Result<()> {
        Pin::new(&mut self.body).start_seek(position)
    }

    fn poll_complete(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<u64>> {
        Pin::new(&mut self.body).poll_complete(cx)
    }
}

impl fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEntry")
            .field("size", &self.size)
            .field("mod_time", &self.mod_time)
            .field("checksum", &hex::encode(&self.checksum))
            .finish_non_exhaustive()
    }
}
