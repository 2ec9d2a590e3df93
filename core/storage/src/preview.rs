//! Transient preview handles.
//!
//! A preview handle is a file in the preview directory holding downloaded
//! image bytes. Handles are owned by the account that fetched them and must
//! be released when the account goes away or the file leaves its listing.

use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

use drivehub_common::{Error, Result};

/// Reference to preview bytes stored on disk.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PreviewHandle {
    path: PathBuf,
}

impl PreviewHandle {
    /// Wrap a path as a handle.
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Location of the preview bytes.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Directory-backed allocator for preview handles.
pub struct PreviewCache {
    dir: PathBuf,
}

impl PreviewCache {
    /// Create a cache rooted at `dir`.
    ///
    /// # Errors
    /// - The directory cannot be created
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();

        if !dir.exists() {
            std::fs::create_dir_all(&dir)?;
        }

        Ok(Self { dir })
    }

    /// Root directory of the cache.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Store `data` and return a handle to it.
    pub async fn acquire(&self, data: &[u8]) -> Result<PreviewHandle> {
        let path = self.dir.join(Uuid::new_v4().simple().to_string());
        fs::write(&path, data).await?;
        debug!(path = %path.display(), bytes = data.len(), "Acquired preview handle");
        Ok(PreviewHandle::new(path))
    }

    /// Check whether the handle still points at live bytes.
    pub fn is_live(&self, handle: &PreviewHandle) -> bool {
        self.owns(handle) && handle.path.is_file()
    }

    /// Read the bytes behind a handle.
    pub async fn read(&self, handle: &PreviewHandle) -> Result<Vec<u8>> {
        if !self.owns(handle) {
            return Err(Error::InvalidInput(format!(
                "Preview {} is outside the cache",
                handle.path.display()
            )));
        }
        Ok(fs::read(&handle.path).await?)
    }

    /// Release one handle. Releasing an already released handle is fine.
    ///
    /// # Errors
    /// - The handle does not belong to this cache
    /// - The file exists but cannot be removed
    pub async fn release(&self, handle: &PreviewHandle) -> Result<()> {
        if !self.owns(handle) {
            return Err(Error::InvalidInput(format!(
                "Preview {} is outside the cache",
                handle.path.display()
            )));
        }

        match fs::remove_file(&handle.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Release every handle, logging failures. Returns how many were released.
    pub async fn release_all(&self, handles: impl IntoIterator<Item = PreviewHandle>) -> usize {
        let mut released = 0;
        for handle in handles {
            match self.release(&handle).await {
                Ok(()) => released += 1,
                Err(e) => warn!(path = %handle.path.display(), "Failed to release preview: {}", e),
            }
        }
        released
    }

    fn owns(&self, handle: &PreviewHandle) -> bool {
        handle.path.parent() == Some(self.dir.as_path())
    }
}
