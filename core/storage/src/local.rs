//! JSON file account backend.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;

use drivehub_common::{Error, Result};

use crate::store::AccountBackend;

/// Stores the account record as a JSON file on the local filesystem.
///
/// Writes go to a sibling temporary file first and are renamed into place,
/// so a crash mid-write leaves the previous record intact.
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    /// Create a backend for the record at `path`.
    ///
    /// The file and its parent directory are created on first write.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Path of the record file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "accounts.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl AccountBackend for FileBackend {
    fn name(&self) -> &str {
        "file"
    }

    async fn read(&self) -> Result<Option<Vec<u8>>> {
        match fs::read(&self.path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Io(e)),
        }
    }

    async fn write(&self, data: &[u8]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let temp = self.temp_path();
        fs::write(&temp, data).await?;
        fs::rename(&temp, &self.path).await.map_err(|e| {
            Error::Storage(format!(
                "Failed to replace {}: {}",
                self.path.display(),
                e
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_file_reads_none() {
        let temp = TempDir::new().unwrap();
        let backend = FileBackend::new(temp.path().join("accounts.json"));
        assert!(backend.read().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_write_creates_parent_and_replaces() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("accounts.json");
        let backend = FileBackend::new(&path);

        backend.write(b"[1]").await.unwrap();
        backend.write(b"[2]").await.unwrap();

        assert_eq!(backend.read().await.unwrap(), Some(b"[2]".to_vec()));
        assert!(!backend.temp_path().exists());
    }
}
