//! Key-value persistence seam for tier storage
//!
//! The core never assumes a filesystem or database; any backend that can
//! load and save named blobs qualifies. Tier stores serialize themselves
//! through this trait and nothing else.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::Result;

/// A named-blob persistence collaborator.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Read the blob stored under `key`, or `None` if absent
    async fn read_blob(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Write `bytes` under `key`, replacing any previous blob
    async fn write_blob(&self, key: &str, bytes: &[u8]) -> Result<()>;

    /// Check whether a blob exists under `key`
    async fn exists(&self, key: &str) -> Result<bool>;
}

/// In-memory blob store backed by a concurrent map.
///
/// Used by tests and by embedders that manage persistence themselves.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: DashMap<String, Vec<u8>>,
}

impl MemoryBlobStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of blobs currently stored
    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    /// Check if the store holds no blobs
    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn read_blob(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.blobs.get(key).map(|entry| entry.value().clone()))
    }

    async fn write_blob(&self, key: &str, bytes: &[u8]) -> Result<()> {
        self.blobs.insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.blobs.contains_key(key))
    }
}
