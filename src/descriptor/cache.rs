//! On-disk cache of metainfo descriptors, one `<infohash>.torrent` per session.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, instrument};

use crate::session::InfoHash;

/// File extension of cached descriptors.
const CACHE_EXTENSION: &str = "torrent";

/// Errors from descriptor cache IO.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Filesystem failure.
    #[error("descriptor cache IO error at {path}: {source}")]
    Io {
        /// Path that failed.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

/// Directory holding cached descriptors.
#[derive(Debug, Clone)]
pub struct DescriptorCache {
    dir: PathBuf,
}

impl DescriptorCache {
    /// Creates a cache rooted at `dir`. The directory is created lazily.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Cache directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the cached descriptor for `id`.
    #[must_use]
    pub fn path_for(&self, id: &InfoHash) -> PathBuf {
        self.dir.join(format!("{id}.{CACHE_EXTENSION}"))
    }

    /// Writes the descriptor bytes for `id`, replacing any previous copy.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Io`] if the directory or file cannot be written.
    #[instrument(skip(self, bytes), fields(id = %id, len = bytes.len()))]
    pub async fn store(&self, id: &InfoHash, bytes: &[u8]) -> Result<PathBuf, CacheError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| CacheError::Io {
                path: self.dir.clone(),
                source,
            })?;
        let path = self.path_for(id);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|source| CacheError::Io {
                path: path.clone(),
                source,
            })?;
        debug!(path = %path.display(), "cached descriptor");
        Ok(path)
    }

    /// Removes the cached descriptor for `id`.
    ///
    /// Returns `Ok(false)` when nothing was cached.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Io`] for failures other than a missing file.
    #[instrument(skip(self), fields(id = %id))]
    pub async fn remove(&self, id: &InfoHash) -> Result<bool, CacheError> {
        let path = self.path_for(id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(path = %path.display(), "removed cached descriptor");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(source) => Err(CacheError::Io { path, source }),
        }
    }
}
