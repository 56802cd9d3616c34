//! On-disk blob store using tokio::fs.
//!
//! Blob `k` lives at `<dir>/<k>.json`. Writes go to a temp file first and
//! are renamed into place, so a crash mid-write leaves the previous blob.

use async_trait::async_trait;
use replica_core::cache::{BlobStore, CacheError, Result};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Native blob store for the daemon
#[derive(Debug, Clone)]
pub struct FileBlobStore {
    dir: PathBuf,
}

impl FileBlobStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn blob_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

fn storage(e: std::io::Error) -> CacheError {
    CacheError::Storage(e.to_string())
}

#[async_trait]
impl BlobStore for FileBlobStore {
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match fs::read(self.blob_path(key)).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(storage(e)),
        }
    }

    async fn write(&self, key: &str, data: &[u8]) -> Result<()> {
        fs::create_dir_all(&self.dir).await.map_err(storage)?;

        let target = self.blob_path(key);
        let temp = self.dir.join(format!(".{}.json.tmp", key));
        fs::write(&temp, data).await.map_err(storage)?;
        fs::rename(&temp, &target).await.map_err(storage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replica_core::{FileNode, LocalCache};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_blob_reads_none() {
        let dir = TempDir::new().unwrap();
        let store = FileBlobStore::new(dir.path());
        assert_eq!(store.read("fileTree").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_write_creates_directory_and_replaces() {
        let dir = TempDir::new().unwrap();
        let store = FileBlobStore::new(dir.path().join("nested/cache"));

        store.write("chatMessages", b"[1]").await.unwrap();
        store.write("chatMessages", b"[1,2]").await.unwrap();

        assert_eq!(store.read("chatMessages").await.unwrap(), Some(b"[1,2]".to_vec()));
        let on_disk = std::fs::read(dir.path().join("nested/cache/chatMessages.json")).unwrap();
        assert_eq!(on_disk, b"[1,2]");
        assert!(!dir.path().join("nested/cache/.chatMessages.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_local_cache_over_files() {
        let dir = TempDir::new().unwrap();
        let cache = LocalCache::new(FileBlobStore::new(dir.path()));
        let tree = vec![FileNode::file("src/main.rs", "fn main() {}")];
        cache.save_tree(&tree).await.unwrap();

        let reopened = LocalCache::new(FileBlobStore::new(dir.path()));
        assert_eq!(reopened.load_tree().await.unwrap(), Some(tree));
    }

    #[tokio::test]
    async fn test_unreadable_blob_is_storage_error() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("fileTree.json")).unwrap();
        let store = FileBlobStore::new(dir.path());
        assert!(matches!(store.read("fileTree").await, Err(CacheError::Storage(_))));
    }
}
