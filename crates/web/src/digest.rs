//! Content fingerprints used as cache validators.
//!
//! The ETag is the MD5 of the uncompressed representation as quoted lowercase hex,
//! Content-MD5 is the same digest in standard base64. Bytes, blocking readers, async
//! readers and files all go through the same [`ContentDigest`], so equal content
//! always yields equal validators.

use std::fmt::Write as _;
use std::io::{self, Read};
use std::path::Path;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use md5::{Digest, Md5};
use tokio::io::{AsyncRead, AsyncReadExt};

const READ_CHUNK_SIZE: usize = 8 * 1024;

/// ETag and Content-MD5 of one representation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheValidator {
    etag: String,
    content_md5: String,
}

impl CacheValidator {
    pub fn of_bytes(bytes: &[u8]) -> Self {
        let mut digest = ContentDigest::new();
        digest.update(bytes);
        digest.finish()
    }

    pub fn of_reader<R: Read>(mut reader: R) -> io::Result<Self> {
        let mut digest = ContentDigest::new();
        let mut buf = [0_u8; READ_CHUNK_SIZE];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => return Ok(digest.finish()),
                Ok(n) => digest.update(&buf[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
    }

    pub async fn of_async_reader<R: AsyncRead + Unpin>(mut reader: R) -> io::Result<Self> {
        let mut digest = ContentDigest::new();
        let mut buf = vec![0_u8; READ_CHUNK_SIZE];
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                return Ok(digest.finish());
            }
            digest.update(&buf[..n]);
        }
    }

    pub async fn of_file(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = tokio::fs::File::open(path).await?;
        Self::of_async_reader(file).await
    }

    /// The quoted hex digest, e.g. `"db89bb5ceab87f9c0fcc2ab36c189c2c"`.
    pub fn etag(&self) -> &str {
        &self.etag
    }

    pub fn content_md5(&self) -> &str {
        &self.content_md5
    }

    /// Byte-for-byte comparison against an `If-None-Match` value.
    pub fn matches(&self, if_none_match: &[u8]) -> bool {
        self.etag.as_bytes() == if_none_match
    }
}

/// Incremental MD5 over a representation that arrives in pieces.
#[derive(Debug, Clone, Default)]
pub struct ContentDigest {
    hasher: Md5,
}

impl ContentDigest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    pub fn finish(self) -> CacheValidator {
        let digest = self.hasher.finalize();

        let mut etag = String::with_capacity(digest.len() * 2 + 2);
        etag.push('"');
        for byte in digest.iter() {
            let _ = write!(etag, "{byte:02x}");
        }
        etag.push('"');

        CacheValidator { etag, content_md5: STANDARD.encode(digest) }
    }
}
