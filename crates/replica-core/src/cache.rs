//! Local durable cache of the replica.
//!
//! Two independent JSON blobs: the file forest under `fileTree` and the chat
//! log under `chatMessages`. The storage backend is pluggable through
//! [`BlobStore`]:
//! - `InMemoryBlobStore` - For testing
//! - `FileBlobStore` (in replica-daemon) - One file per key via tokio::fs

use crate::chat::ChatMessage;
use crate::node::FileNode;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;

pub const TREE_KEY: &str = "fileTree";
pub const CHAT_KEY: &str = "chatMessages";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Corrupt {key} blob: {reason}")]
    Corrupt { key: String, reason: String },
}

pub type Result<T> = std::result::Result<T, CacheError>;

/// Key/value byte storage that survives restarts.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Read a blob. `Ok(None)` if it was never written.
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Replace a blob.
    async fn write(&self, key: &str, data: &[u8]) -> Result<()>;
}

/// In-memory blob store for testing. Clones share the same blobs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBlobStore {
    blobs: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current bytes under `key`, bypassing the async API.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.blobs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    /// Seed a blob, e.g. with deliberately corrupt bytes.
    pub fn put(&self, key: &str, data: impl Into<Vec<u8>>) {
        self.blobs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), data.into());
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.get(key))
    }

    async fn write(&self, key: &str, data: &[u8]) -> Result<()> {
        self.put(key, data);
        Ok(())
    }
}

/// Typed access to the two cached blobs.
#[derive(Debug)]
pub struct LocalCache<S: BlobStore> {
    store: S,
}

impl<S: BlobStore> LocalCache<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn load_tree(&self) -> Result<Option<Vec<FileNode>>> {
        self.load(TREE_KEY).await
    }

    pub async fn load_chat(&self) -> Result<Option<Vec<ChatMessage>>> {
        self.load(CHAT_KEY).await
    }

    pub async fn save_tree(&self, tree: &[FileNode]) -> Result<()> {
        self.save(TREE_KEY, tree).await
    }

    pub async fn save_chat(&self, messages: &[ChatMessage]) -> Result<()> {
        self.save(CHAT_KEY, messages).await
    }

    async fn load<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(bytes) = self.store.read(key).await? else {
            return Ok(None);
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| CacheError::Corrupt {
                key: key.to_string(),
                reason: e.to_string(),
            })
    }

    async fn save<T: serde::Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value).map_err(|e| CacheError::Storage(e.to_string()))?;
        self.store.write(key, &bytes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_blobs_load_as_none() {
        let cache = LocalCache::new(InMemoryBlobStore::new());
        assert!(cache.load_tree().await.unwrap().is_none());
        assert!(cache.load_chat().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_tree_and_chat_are_independent_blobs() {
        let cache = LocalCache::new(InMemoryBlobStore::new());
        let tree = vec![FileNode::file("a.txt", "x")];
        cache.save_tree(&tree).await.unwrap();

        assert_eq!(cache.load_tree().await.unwrap(), Some(tree));
        assert!(cache.load_chat().await.unwrap().is_none());
        assert!(cache.store().get(TREE_KEY).is_some());
        assert!(cache.store().get(CHAT_KEY).is_none());
    }

    #[tokio::test]
    async fn test_chat_blob_is_a_json_array() {
        let cache = LocalCache::new(InMemoryBlobStore::new());
        let messages = vec![ChatMessage {
            id: 1,
            author: "a".into(),
            body: "b".into(),
            created_at: 1,
            origin_is_local: true,
        }];
        cache.save_chat(&messages).await.unwrap();

        let raw = cache.store().get(CHAT_KEY).unwrap();
        assert!(raw.starts_with(b"[{"));
        assert_eq!(cache.load_chat().await.unwrap(), Some(messages));
    }

    #[tokio::test]
    async fn test_corrupt_blob() {
        let store = InMemoryBlobStore::new();
        store.put(TREE_KEY, "{not json");
        let cache = LocalCache::new(store);

        let err = cache.load_tree().await.unwrap_err();
        assert!(matches!(err, CacheError::Corrupt { ref key, .. } if key == TREE_KEY));
    }
}
