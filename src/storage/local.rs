//! Local filesystem payload store.

use async_trait::async_trait;
use bytes::Bytes;
use std::path::PathBuf;
use tokio::fs;

use super::backend::{StorageBackend, StorageError, StorageResult};

/// Filesystem-backed payload store.
///
/// Payloads land under `{base}/{namespace}/{key[..2]}/{key[2..]}`; the
/// two-character fan-out keeps directories small when a namespace holds many
/// chunks. Keys are content addresses, so an object that already exists
/// under its key holds exactly the requested bytes and a put becomes a
/// no-op. Writes go through a temporary sibling and a rename, so a torn
/// write is never visible under its final key.
pub struct LocalStorage {
    base_path: PathBuf,
}

impl LocalStorage {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn object_path(&self, namespace: &str, key: &str) -> PathBuf {
        let dir = self.base_path.join(namespace);
        if key.len() < 2 {
            return dir.join(key);
        }
        let (shard, rest) = key.split_at(2);
        dir.join(shard).join(rest)
    }
}

#[async_trait]
impl StorageBackend for LocalStorage {
    async fn get(&self, namespace: &str, key: &str) -> StorageResult<Bytes> {
        let path = self.object_path(namespace, key);
        match fs::read(&path).await {
            Ok(bytes) => Ok(Bytes::from(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(format!("{namespace}/{key}")))
            }
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    async fn put(&self, namespace: &str, key: &str, data: Bytes) -> StorageResult<()> {
        let path = self.object_path(namespace, key);

        // Content-addressed: an existing object already holds these bytes.
        if fs::try_exists(&path).await? {
            return Ok(());
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let staging = path.with_extension("tmp");
        fs::write(&staging, &data).await?;
        fs::rename(&staging, &path).await?;
        Ok(())
    }

    async fn delete(&self, namespace: &str, key: &str) -> StorageResult<()> {
        let path = self.object_path(namespace, key);
        if let Err(e) = fs::remove_file(&path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                return Err(StorageError::Io(e));
            }
        }
        Ok(())
    }

    async fn exists(&self, namespace: &str, key: &str) -> StorageResult<bool> {
        Ok(fs::try_exists(&self.object_path(namespace, key)).await?)
    }
}
