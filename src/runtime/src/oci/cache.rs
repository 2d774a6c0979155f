//! Content-addressed blob cache.
//!
//! Blobs live at `<cache_root>/blobs/<algorithm>/<hash>`. A file
//! present under its digest path is a valid blob for that digest: a
//! blob only becomes visible under its final name once fully written.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::debug;
use xenomorph_core::error::{Result, XenoError};

use super::split_digest;

/// Metadata for one cached blob.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Content digest (`algorithm:hash`)
    pub digest: String,
    /// Blob size in bytes
    pub size_bytes: u64,
    /// Last time the blob was read or written
    pub last_used: SystemTime,
    /// On-disk path of the blob
    pub path: PathBuf,
}

/// Content-addressed cache for OCI blobs.
pub struct BlobCache {
    root: PathBuf,
}

impl BlobCache {
    /// Open (and create if needed) a cache rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join("blobs")).map_err(|e| {
            XenoError::Io(std::io::Error::new(
                e.kind(),
                format!("failed to create cache directory {}: {e}", root.display()),
            ))
        })?;
        Ok(Self { root })
    }

    /// The on-disk path for a digest.
    pub fn blob_path(&self, digest: &str) -> Result<PathBuf> {
        let (algorithm, hash) = split_digest(digest)?;
        Ok(self.root.join("blobs").join(algorithm).join(hash))
    }

    /// Whether a blob is cached.
    pub fn contains(&self, digest: &str) -> bool {
        self.blob_path(digest).map(|p| p.is_file()).unwrap_or(false)
    }

    /// Store a blob, returning its path.
    pub fn put(&self, digest: &str, data: &[u8]) -> Result<PathBuf> {
        let path = self.blob_path(digest)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp = path.with_extension("partial");
        fs::write(&tmp, data)?;
        fs::rename(&tmp, &path)?;

        debug!(%digest, size_bytes = data.len(), "cached blob");
        Ok(path)
    }

    /// Read a blob back, refreshing its last-used time.
    pub fn get(&self, digest: &str) -> Result<Option<Vec<u8>>> {
        let path = self.blob_path(digest)?;
        if !path.is_file() {
            return Ok(None);
        }

        let data = fs::read(&path)?;
        if let Ok(file) = fs::OpenOptions::new().append(true).open(&path) {
            let _ = file.set_modified(SystemTime::now());
        }
        Ok(Some(data))
    }

    /// List all cached blobs with their metadata.
    pub fn entries(&self) -> Result<Vec<CacheEntry>> {
        let mut entries = Vec::new();
        let blobs = self.root.join("blobs");

        for algorithm_dir in read_dir_or_empty(&blobs)? {
            let algorithm_path = algorithm_dir.path();
            if !algorithm_path.is_dir() {
                continue;
            }
            let algorithm = algorithm_dir.file_name().to_string_lossy().to_string();

            for blob in read_dir_or_empty(&algorithm_path)? {
                let path = blob.path();
                let meta = match blob.metadata() {
                    Ok(meta) if meta.is_file() => meta,
                    _ => continue,
                };
                entries.push(CacheEntry {
                    digest: format!("{algorithm}:{}", blob.file_name().to_string_lossy()),
                    size_bytes: meta.len(),
                    last_used: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                    path,
                });
            }
        }

        Ok(entries)
    }

    /// Total size of all cached blobs in bytes.
    pub fn total_size(&self) -> Result<u64> {
        Ok(self.entries()?.iter().map(|e| e.size_bytes).sum())
    }

    /// Evict least-recently-used blobs until the cache fits in
    /// `max_bytes`. Returns the number of blobs evicted.
    pub fn prune(&self, max_bytes: u64) -> Result<usize> {
        let mut entries = self.entries()?;
        let total: u64 = entries.iter().map(|e| e.size_bytes).sum();
        if total <= max_bytes {
            return Ok(0);
        }

        entries.sort_by_key(|e| e.last_used);

        let mut current = total;
        let mut evicted = 0;
        for entry in &entries {
            if current <= max_bytes {
                break;
            }
            fs::remove_file(&entry.path)?;
            current = current.saturating_sub(entry.size_bytes);
            evicted += 1;
            debug!(digest = %entry.digest, size_bytes = entry.size_bytes, "evicted blob");
        }

        Ok(evicted)
    }
}

fn read_dir_or_empty(path: &Path) -> Result<Vec<fs::DirEntry>> {
    match fs::read_dir(path) {
        Ok(iter) => iter
            .collect::<std::io::Result<Vec<_>>>()
            .map_err(XenoError::from),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}
