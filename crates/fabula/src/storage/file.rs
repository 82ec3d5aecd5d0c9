//! File-backed blob store
//!
//! Persists each blob as one file under a data directory. Keys may contain
//! `/` separators which map to subdirectories; all other path-hostile
//! characters are rejected.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::{FabulaError, Result};
use crate::storage::blob::BlobStore;

/// Blob store that writes one file per key under a base directory.
#[derive(Debug, Clone)]
pub struct FileBlobStore {
    base_dir: PathBuf,
}

impl FileBlobStore {
    /// Create a store rooted at `base_dir`, creating the directory if needed
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir })
    }

    /// Create a store rooted at the default data directory (`~/.fabula`)
    pub fn default_location() -> Result<Self> {
        let dir = dirs::home_dir()
            .map(|h| h.join(".fabula"))
            .unwrap_or_else(|| PathBuf::from(".fabula"));
        Self::new(dir)
    }

    /// Base directory this store writes under
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() {
            return Err(FabulaError::Storage("Empty blob key".to_string()));
        }

        let valid = key.split('/').all(|segment| {
            !segment.is_empty()
                && segment != ".."
                && segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        });
        if !valid {
            return Err(FabulaError::Storage(format!("Invalid blob key: {key}")));
        }

        Ok(self.base_dir.join(key))
    }
}

#[async_trait]
impl BlobStore for FileBlobStore {
    async fn read_blob(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(FabulaError::Storage(format!(
                "Failed to read {}: {e}",
                path.display()
            ))),
        }
    }

    async fn write_blob(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Write-then-rename so a crash mid-write never truncates the blob.
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes).await.map_err(|e| {
            FabulaError::Storage(format!("Failed to write {}: {e}", tmp.display()))
        })?;
        tokio::fs::rename(&tmp, &path).await.map_err(|e| {
            FabulaError::Storage(format!("Failed to commit {}: {e}", path.display()))
        })?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let path = self.path_for(key)?;
        Ok(tokio::fs::try_exists(&path).await.unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBlobStore::new(dir.path()).unwrap();

        store.write_blob("tier/recent", b"records").await.unwrap();
        assert!(store.exists("tier/recent").await.unwrap());
        assert_eq!(
            store.read_blob("tier/recent").await.unwrap(),
            Some(b"records".to_vec())
        );
    }

    #[tokio::test]
    async fn test_missing_key_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBlobStore::new(dir.path()).unwrap();

        assert_eq!(store.read_blob("tier/derived").await.unwrap(), None);
        assert!(!store.exists("tier/derived").await.unwrap());
    }

    #[tokio::test]
    async fn test_rejects_traversal_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBlobStore::new(dir.path()).unwrap();

        assert!(store.read_blob("../escape").await.is_err());
        assert!(store.write_blob("a//b", b"x").await.is_err());
        assert!(store.write_blob("", b"x").await.is_err());
    }

    #[tokio::test]
    async fn test_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBlobStore::new(dir.path()).unwrap();

        store.write_blob("key", b"one").await.unwrap();
        store.write_blob("key", b"two").await.unwrap();
        assert_eq!(store.read_blob("key").await.unwrap(), Some(b"two".to_vec()));
    }
}
