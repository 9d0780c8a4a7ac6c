//! Storage backend trait definition.
//!
//! Abstraction over the object payload store. Keys are generated by the
//! storage manager (SHA-256 of the payload), so `put` is idempotent under
//! retry of the same key+bytes, and objects are immutable once written.

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;

/// Storage error types
#[derive(Debug)]
pub enum StorageError {
    /// Object not found
    NotFound(String),
    /// IO error
    Io(std::io::Error),
    /// Other error
    Other(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::NotFound(key) => write!(f, "object not found: {}", key),
            StorageError::Io(e) => write!(f, "io error: {}", e),
            StorageError::Other(msg) => write!(f, "storage error: {}", msg),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::NotFound {
            StorageError::NotFound(e.to_string())
        } else {
            StorageError::Io(e)
        }
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Storage backend trait for pluggable payload storage.
///
/// Keys are organized by namespace to allow different storage policies per
/// object type.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Get an object by namespace and key
    async fn get(&self, namespace: &str, key: &str) -> StorageResult<Bytes>;

    /// Put an object by namespace and key
    async fn put(&self, namespace: &str, key: &str, data: Bytes) -> StorageResult<()>;

    /// Delete an object by namespace and key
    async fn delete(&self, namespace: &str, key: &str) -> StorageResult<()>;

    /// Check if an object exists
    async fn exists(&self, namespace: &str, key: &str) -> StorageResult<bool>;
}

/// Storage namespaces
pub mod namespaces {
    /// Externalized chunk payloads
    pub const CHUNKS: &str = "chunks";
}
