//! In-memory representation of one cached file.

use std::path::PathBuf;
use std::time::SystemTime;

use bytes::Bytes;
use serde::Serialize;

/// One HTTP-visible path. Pre-compressed siblings (`path.gz`, `path.br`)
/// are separate entries whose `content` holds the compressed bytes; an
/// on-the-fly gzip result lives in the source entry's `gzip` field.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Canonical on-disk path the entry was loaded from.
    pub disk_path: PathBuf,
    /// HTTP-visible path (cache key).
    pub http_path: String,
    /// Lowercased extension of the disk file.
    pub extension: String,
    /// Last-write timestamp at load time; the coherence check compares
    /// against a fresh stat of `disk_path`.
    pub modified: SystemTime,
    /// Payload after template expansion, uncompressed.
    pub content: Bytes,
    /// Gzip of `content`, present only when strictly smaller.
    pub gzip: Option<Bytes>,
    pub hits: u64,
}

/// Admin-endpoint view of a cache entry.
#[derive(Debug, Clone, Serialize)]
pub struct CacheEntryInfo {
    pub http_path: String,
    pub disk_path: String,
    pub extension: String,
    pub size: usize,
    pub gzip_size: Option<usize>,
    pub hits: u64,
}

impl CacheEntry {
    pub fn info(&self) -> CacheEntryInfo {
        CacheEntryInfo {
            http_path: self.http_path.clone(),
            disk_path: self.disk_path.display().to_string(),
            extension: self.extension.clone(),
            size: self.content.len(),
            gzip_size: self.gzip.as_ref().map(Bytes::len),
            hits: self.hits,
        }
    }
}
