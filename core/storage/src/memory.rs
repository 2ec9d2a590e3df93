//! In-memory account backend for testing.

use async_trait::async_trait;
use tokio::sync::RwLock;

use drivehub_common::Result;

use crate::store::AccountBackend;

/// In-memory account backend.
///
/// Useful for testing and for sessions that should not touch the disk.
pub struct MemoryBackend {
    data: RwLock<Option<Vec<u8>>>,
    writes: RwLock<usize>,
}

impl MemoryBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self {
            data: RwLock::new(None),
            writes: RwLock::new(0),
        }
    }

    /// Create a backend that already holds a record.
    pub fn with_contents(data: Vec<u8>) -> Self {
        Self {
            data: RwLock::new(Some(data)),
            writes: RwLock::new(0),
        }
    }

    /// Number of writes performed so far.
    pub async fn writes(&self) -> usize {
        *self.writes.read().await
    }

    /// Current raw record.
    pub async fn contents(&self) -> Option<Vec<u8>> {
        self.data.read().await.clone()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AccountBackend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    async fn read(&self) -> Result<Option<Vec<u8>>> {
        Ok(self.data.read().await.clone())
    }

    async fn write(&self, data: &[u8]) -> Result<()> {
        *self.data.write().await = Some(data.to_vec());
        *self.writes.write().await += 1;
        Ok(())
    }
}
