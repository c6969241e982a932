//! Blob storage abstraction for the remote tier
//!
//! This module provides the core storage trait and an in-memory implementation
//! for testing and development. One [`BlobStorage`] value addresses one
//! container.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use super::{PartialFile, fmt_status};

#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    #[error("Blob not found: {0}")]
    NotFound(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Storage backend error{}: {message}", fmt_status(.status))]
    Backend { status: Option<u16>, message: String },

    #[error("Invalid key format: {0}")]
    InvalidKey(String),

    #[error("Storage configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BlobError {
    /// Classify a non-success HTTP status
    pub fn from_status(status: u16, key: &str, body: String) -> Self {
        match status {
            403 => BlobError::AccessDenied(if body.is_empty() {
                format!("access to '{}' denied", key)
            } else {
                body
            }),
            404 => BlobError::NotFound(key.to_string()),
            _ => BlobError::Backend {
                status: Some(status),
                message: if body.is_empty() {
                    format!("request for '{}' failed", key)
                } else {
                    body
                },
            },
        }
    }

    pub(crate) fn backend(message: impl Into<String>) -> Self {
        BlobError::Backend {
            status: None,
            message: message.into(),
        }
    }
}

/// Abstraction for blob storage backends
#[async_trait]
pub trait BlobStorage: Send + Sync {
    /// Name of the container this storage addresses
    fn container(&self) -> &str;

    /// Store data at the given key
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<(), BlobError>;

    /// Retrieve data by key
    async fn get(&self, key: &str) -> Result<Bytes, BlobError>;

    /// Download a blob into a local file, replacing it if present.
    ///
    /// The target path only ever holds a complete download.
    async fn download_to_file(&self, key: &str, path: &Path) -> Result<u64, BlobError> {
        let data = self.get(key).await?;
        let mut partial = PartialFile::create(path).await?;
        partial.write_all(&data).await?;
        partial.commit().await?;
        Ok(data.len() as u64)
    }

    /// Delete data by key
    async fn delete(&self, key: &str) -> Result<(), BlobError>;
}

/// A stored blob with its content type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub data: Bytes,
    pub content_type: String,
}

/// Operations tracked by [`MemoryStorage`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlobOp {
    Put,
    Get,
    Delete,
}

/// In-memory storage implementation for testing
///
/// Counts every call per operation and can be told to answer an operation
/// with an HTTP status, which makes "no remote call happened" and "exactly
/// one delete" directly assertable.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    name: String,
    data: Mutex<HashMap<String, StoredBlob>>,
    calls: Mutex<HashMap<BlobOp, usize>>,
    failures: Mutex<HashMap<BlobOp, u16>>,
}

impl MemoryStorage {
    pub fn new(container: impl Into<String>) -> Self {
        Self {
            name: container.into(),
            ..Self::default()
        }
    }

    /// Seed a blob without counting it as a call
    pub fn insert(&self, key: &str, data: impl Into<Bytes>, content_type: &str) {
        if let Ok(mut storage) = self.data.lock() {
            storage.insert(
                key.to_string(),
                StoredBlob {
                    data: data.into(),
                    content_type: content_type.to_string(),
                },
            );
        }
    }

    /// Get a stored blob (useful for testing)
    pub fn blob(&self, key: &str) -> Option<StoredBlob> {
        self.data.lock().ok()?.get(key).cloned()
    }

    /// Get all stored keys (useful for testing)
    pub fn keys(&self) -> Vec<String> {
        self.data
            .lock()
            .map(|storage| storage.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Answer every following call of `op` with `status`
    pub fn fail_with(&self, op: BlobOp, status: u16) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.insert(op, status);
        }
    }

    pub fn clear_failures(&self) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.clear();
        }
    }

    /// Number of calls made for one operation
    pub fn calls(&self, op: BlobOp) -> usize {
        self.calls
            .lock()
            .map(|calls| calls.get(&op).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Number of calls made across all operations
    pub fn total_calls(&self) -> usize {
        self.calls
            .lock()
            .map(|calls| calls.values().sum())
            .unwrap_or(0)
    }

    /// Get number of stored items
    pub fn len(&self) -> usize {
        self.data.lock().map(|storage| storage.len()).unwrap_or(0)
    }

    /// Check if storage is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn record(&self, op: BlobOp, key: &str) -> Result<(), BlobError> {
        let mut calls = self
            .calls
            .lock()
            .map_err(|_| BlobError::backend("Lock poisoned"))?;
        *calls.entry(op).or_insert(0) += 1;

        let failures = self
            .failures
            .lock()
            .map_err(|_| BlobError::backend("Lock poisoned"))?;
        match failures.get(&op) {
            Some(&status) => Err(BlobError::from_status(status, key, String::new())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl BlobStorage for MemoryStorage {
    fn container(&self) -> &str {
        &self.name
    }

    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<(), BlobError> {
        self.record(BlobOp::Put, key)?;
        let mut storage = self
            .data
            .lock()
            .map_err(|_| BlobError::backend("Lock poisoned"))?;

        storage.insert(
            key.to_string(),
            StoredBlob {
                data,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes, BlobError> {
        self.record(BlobOp::Get, key)?;
        let storage = self
            .data
            .lock()
            .map_err(|_| BlobError::backend("Lock poisoned"))?;

        storage
            .get(key)
            .map(|blob| blob.data.clone())
            .ok_or_else(|| BlobError::NotFound(key.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), BlobError> {
        self.record(BlobOp::Delete, key)?;
        let mut storage = self
            .data
            .lock()
            .map_err(|_| BlobError::backend("Lock poisoned"))?;

        // Azure answers 404 for a missing blob, so do we
        storage
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| BlobError::NotFound(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_storage_basic_operations() {
        let storage = MemoryStorage::new("templates");
        let key = "invoice.odt";
        let data = Bytes::from_static(b"Hello, World!");

        // Test put and get
        storage
            .put(key, data.clone(), "application/octet-stream")
            .await
            .unwrap();
        let retrieved = storage.get(key).await.unwrap();
        assert_eq!(data, retrieved);

        // Test delete
        storage.delete(key).await.unwrap();
        assert!(storage.blob(key).is_none());
        assert!(storage.get(key).await.is_err());

        assert_eq!(storage.calls(BlobOp::Put), 1);
        assert_eq!(storage.calls(BlobOp::Get), 2);
        assert_eq!(storage.calls(BlobOp::Delete), 1);
        assert_eq!(storage.total_calls(), 4);
    }

    #[tokio::test]
    async fn test_memory_storage_not_found() {
        let storage = MemoryStorage::new("renders");

        match storage.get("nonexistent").await {
            Err(BlobError::NotFound(key)) => assert_eq!(key, "nonexistent"),
            _ => panic!("Expected NotFound error"),
        }
        match storage.delete("nonexistent").await {
            Err(BlobError::NotFound(key)) => assert_eq!(key, "nonexistent"),
            _ => panic!("Expected NotFound error"),
        }
    }

    #[tokio::test]
    async fn test_memory_storage_injected_failures() {
        let storage = MemoryStorage::new("renders");
        storage.insert("report.pdf", b"pdf".to_vec(), "application/pdf");

        storage.fail_with(BlobOp::Get, 403);
        assert!(matches!(
            storage.get("report.pdf").await,
            Err(BlobError::AccessDenied(_))
        ));

        storage.fail_with(BlobOp::Get, 503);
        assert!(matches!(
            storage.get("report.pdf").await,
            Err(BlobError::Backend {
                status: Some(503),
                ..
            })
        ));

        storage.clear_failures();
        assert_eq!(storage.get("report.pdf").await.unwrap(), &b"pdf"[..]);
        assert_eq!(storage.calls(BlobOp::Get), 3);
    }

    #[tokio::test]
    async fn test_download_to_file_writes_complete_file() {
        let dir = tempfile::tempdir().unwrap();
        let storage = MemoryStorage::new("templates");
        storage.insert("letter.docx", b"Some content.\n".to_vec(), "application/octet-stream");

        let target = dir.path().join("letter.docx");
        let written = storage.download_to_file("letter.docx", &target).await.unwrap();

        assert_eq!(written, 14);
        assert_eq!(std::fs::read(&target).unwrap(), b"Some content.\n");
        // Only the target remains, no leftover partial file
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_memory_storage_utilities() {
        let storage = MemoryStorage::new("templates");

        assert_eq!(storage.len(), 0);
        assert!(storage.is_empty());
        assert_eq!(storage.container(), "templates");

        storage.insert("key1", b"data1".to_vec(), "text/plain");
        storage.insert("key2", b"data2".to_vec(), "text/plain");

        assert_eq!(storage.len(), 2);
        assert!(!storage.is_empty());
        assert_eq!(storage.total_calls(), 0);

        let keys = storage.keys();
        assert!(keys.contains(&"key1".to_string()));
        assert!(keys.contains(&"key2".to_string()));
        assert_eq!(storage.blob("key1").unwrap().content_type, "text/plain");
    }
}
