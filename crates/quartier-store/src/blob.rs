//! Blob storage for media message payloads.
//!
//! The engine only needs "put bytes, get back a URL"; everything else
//! (CDN, cleanup, transcoding) belongs to the hosting application.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use quartier_shared::constants::MAX_BLOB_SIZE;

use crate::error::{Result, StoreError};

/// Write-only blob store collaborator.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` under `path` and return a URL for the uploaded blob.
    async fn put(&self, path: &str, bytes: Bytes) -> Result<String>;
}

/// In-memory [`BlobStore`] returning `mem://` URLs.
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Bytes>>,
    max_size: usize,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self {
            blobs: Mutex::new(HashMap::new()),
            max_size: MAX_BLOB_SIZE,
        }
    }

    pub fn with_max_size(max_size: usize) -> Self {
        Self {
            blobs: Mutex::new(HashMap::new()),
            max_size,
        }
    }

    /// Fetch a stored blob back (test helper).
    pub fn get(&self, path: &str) -> Option<Bytes> {
        self.blobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(path)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, path: &str, bytes: Bytes) -> Result<String> {
        if bytes.len() > self.max_size {
            return Err(StoreError::BlobTooLarge {
                size: bytes.len(),
                max: self.max_size,
            });
        }

        debug!(path, size = bytes.len(), "stored blob");
        self.blobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(path.to_string(), bytes);
        Ok(format!("mem://{path}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_returns_url() {
        let blobs = MemoryBlobStore::new();
        let url = blobs
            .put("media/r1/photo.jpg", Bytes::from_static(b"jpeg"))
            .await
            .unwrap();
        assert_eq!(url, "mem://media/r1/photo.jpg");
        assert_eq!(blobs.get("media/r1/photo.jpg").unwrap(), "jpeg");
    }

    #[tokio::test]
    async fn test_size_cap() {
        let blobs = MemoryBlobStore::with_max_size(4);
        let result = blobs.put("big", Bytes::from_static(b"12345")).await;
        assert!(matches!(result, Err(StoreError::BlobTooLarge { .. })));
        assert!(blobs.is_empty());
    }
}
