//! The storage manager: owns every mutating operation on the layer stack and
//! enforces its invariants.
//!
//! Concurrency follows a single process-wide readers-writer discipline:
//! mutating operations (insert, write, checkpoint, truncate, delete) take the
//! exclusive side and run inside one metadata transaction; readers take the
//! shared side and observe the latest committed state. Dropping an operation
//! mid-flight rolls its transaction back, so no partial metadata is ever
//! observable.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use sea_orm::{ConnectionTrait, DatabaseConnection, DatabaseTransaction, TransactionTrait};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use crate::db::meta;
use crate::engine::{ByteRange, Chunk, Layer, Payload};
use crate::error::{EngineError, Result};
use crate::storage::{namespaces, StorageBackend};

/// Basic file listing entry
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FileInfo {
    pub id: i64,
    pub name: String,
}

/// The storage manager.
///
/// Constructed once per process; owns the metadata connection and, when
/// configured, the object payload store for the lifetime of the process.
pub struct Manager {
    db: DatabaseConnection,
    object_store: Option<Arc<dyn StorageBackend>>,
    /// Payloads at or above this size go to the object store
    externalize_threshold: usize,
    lock: RwLock<()>,
}

impl Manager {
    /// Create a manager that keeps every chunk payload inline in the
    /// metadata store.
    pub fn new(db: DatabaseConnection) -> Self {
        Self {
            db,
            object_store: None,
            externalize_threshold: usize::MAX,
            lock: RwLock::new(()),
        }
    }

    /// Externalize payloads of `threshold` bytes or more to the given object
    /// store; smaller payloads stay inline.
    pub fn with_object_store(mut self, store: Arc<dyn StorageBackend>, threshold: usize) -> Self {
        self.object_store = Some(store);
        self.externalize_threshold = threshold;
        self
    }

    /// Create a file together with its initial empty active layer.
    pub async fn insert_file(&self, name: &str) -> Result<i64> {
        let _guard = self.lock.write().await;
        tracing::debug!(file = name, "inserting file");

        let txn = self.db.begin().await?;
        if meta::file_id_by_name(&txn, name).await?.is_some() {
            return Err(EngineError::AlreadyExists(format!("file {name}")));
        }
        let file_id = meta::insert_file(&txn, name).await?;
        let layer_id = meta::insert_active_layer(&txn, file_id).await?;
        txn.commit().await?;

        tracing::debug!(file = name, file_id, layer_id, "file inserted");
        Ok(file_id)
    }

    /// Append one chunk to the file's active layer.
    ///
    /// The offset must not exceed the current virtual size; writing exactly
    /// at the end extends the file, writing inside the image records a newer
    /// chunk that masks older bytes on read.
    pub async fn write_file(&self, name: &str, data: &[u8], offset: u64) -> Result<()> {
        let _guard = self.lock.write().await;
        tracing::debug!(file = name, size = data.len(), offset, "writing data");

        let txn = self.db.begin().await?;
        self.append_chunk(&txn, name, data, offset).await?;
        txn.commit().await?;

        tracing::debug!(file = name, size = data.len(), offset, "data written");
        Ok(())
    }

    /// Read `size` bytes starting at `offset` from the latest image.
    pub async fn read_file(&self, name: &str, offset: u64, size: u64) -> Result<Bytes> {
        let _guard = self.lock.read().await;
        self.read_image(name, offset, size, None).await
    }

    /// Read from the image as it was sealed under `tag`.
    pub async fn read_file_at(&self, name: &str, offset: u64, size: u64, tag: &str) -> Result<Bytes> {
        let _guard = self.lock.read().await;
        self.read_image(name, offset, size, Some(tag)).await
    }

    /// Seal the active layer under `tag` and open a fresh one.
    ///
    /// All four steps (version row, seal, new layer) commit in one
    /// transaction or not at all.
    pub async fn checkpoint(&self, name: &str, tag: &str) -> Result<()> {
        let _guard = self.lock.write().await;
        tracing::debug!(file = name, tag, "checkpointing");

        let txn = self.db.begin().await?;
        let file_id = require_file(&txn, name).await?;
        if meta::version_exists(&txn, tag).await? {
            return Err(EngineError::AlreadyExists(format!("version tag {tag}")));
        }
        let layer_id = meta::active_layer_id(&txn, file_id)
            .await?
            .ok_or_else(|| EngineError::Invariant(format!("file {name} has no active layer")))?;

        let version_id = meta::insert_version(&txn, tag).await?;
        meta::seal_layer(&txn, layer_id, version_id).await?;
        let new_layer_id = meta::insert_active_layer(&txn, file_id).await?;
        txn.commit().await?;

        tracing::debug!(
            file = name,
            tag,
            sealed_layer = layer_id,
            new_layer = new_layer_id,
            "checkpoint complete"
        );
        Ok(())
    }

    /// Virtual size of the file including the active layer.
    pub async fn size_of(&self, name: &str) -> Result<u64> {
        let _guard = self.lock.read().await;
        let file_id = require_file(&self.db, name).await?;
        virtual_size(&self.db, file_id).await
    }

    /// Change the file size. Growing writes a zero-filled chunk at the tail;
    /// shrinking is not supported.
    pub async fn truncate(&self, name: &str, new_size: u64) -> Result<()> {
        let _guard = self.lock.write().await;
        tracing::debug!(file = name, new_size, "truncating");

        let txn = self.db.begin().await?;
        let file_id = require_file(&txn, name).await?;
        let size = virtual_size(&txn, file_id).await?;

        if new_size == size {
            return Ok(());
        }
        if new_size < size {
            return Err(EngineError::Unsupported {
                current: size,
                requested: new_size,
            });
        }

        let zeros = vec![0u8; (new_size - size) as usize];
        self.append_chunk(&txn, name, &zeros, size).await?;
        txn.commit().await?;

        tracing::debug!(file = name, old_size = size, new_size, "file extended");
        Ok(())
    }

    /// Remove the file with all its layers and chunks. Absent names are a
    /// no-op.
    pub async fn delete_file(&self, name: &str) -> Result<()> {
        let _guard = self.lock.write().await;
        tracing::debug!(file = name, "deleting file");

        let txn = self.db.begin().await?;
        let Some(file_id) = meta::file_id_by_name(&txn, name).await? else {
            tracing::debug!(file = name, "file not found, nothing to delete");
            return Ok(());
        };

        meta::delete_chunks_by_file(&txn, file_id).await?;
        meta::delete_layers_by_file(&txn, file_id).await?;
        meta::delete_file(&txn, file_id).await?;
        txn.commit().await?;

        tracing::info!(file = name, file_id, "file deleted");
        Ok(())
    }

    /// List all files.
    pub async fn get_all_files(&self) -> Result<Vec<FileInfo>> {
        let _guard = self.lock.read().await;
        let rows = meta::all_files(&self.db).await?;
        Ok(rows
            .into_iter()
            .map(|f| FileInfo {
                id: f.id,
                name: f.name,
            })
            .collect())
    }

    /// File id by name; `None` when the file does not exist.
    pub async fn file_id_by_name(&self, name: &str) -> Result<Option<i64>> {
        let _guard = self.lock.read().await;
        meta::file_id_by_name(&self.db, name).await
    }

    /// All layers of a file in creation order, version tags resolved.
    pub async fn layers_of(&self, file_id: i64) -> Result<Vec<Layer>> {
        let _guard = self.lock.read().await;
        meta::layers_by_file(&self.db, file_id).await
    }

    /// Record one chunk in the active layer, guarding the write contract.
    /// Runs inside the caller's transaction.
    async fn append_chunk(
        &self,
        txn: &DatabaseTransaction,
        name: &str,
        data: &[u8],
        offset: u64,
    ) -> Result<()> {
        let file_id = require_file(txn, name).await?;
        let layer_id = meta::active_layer_id(txn, file_id)
            .await?
            .ok_or_else(|| EngineError::Invariant(format!("file {name} has no active layer")))?;

        let size = virtual_size(txn, file_id).await?;
        if offset > size {
            tracing::debug!(file = name, offset, size, "write offset beyond file size");
            return Err(EngineError::OutOfRange { offset, size });
        }

        // Base is computed before this insertion; an empty layer has base 0.
        let base = meta::layer_base(txn, layer_id).await?.unwrap_or(0);
        let layer_start = offset.saturating_sub(base);
        let len = data.len() as u64;
        let layer_range = ByteRange::new(layer_start, layer_start + len);
        let file_range = ByteRange::new(offset, offset + len);

        let payload = self.persist_payload(data).await?;
        meta::insert_chunk(txn, layer_id, offset, &payload, layer_range, file_range).await?;

        tracing::debug!(
            file = name,
            layer_id,
            offset,
            size = data.len(),
            %layer_range,
            %file_range,
            "chunk recorded"
        );
        Ok(())
    }

    /// Copy the payload into its storage location and return the handle.
    ///
    /// Externalized payloads are content-addressed by SHA-256, so a retried
    /// put of the same bytes lands on the same key.
    async fn persist_payload(&self, data: &[u8]) -> Result<Payload> {
        match &self.object_store {
            Some(store) if data.len() >= self.externalize_threshold => {
                let key = payload_key(data);
                store
                    .put(namespaces::CHUNKS, &key, Bytes::copy_from_slice(data))
                    .await?;
                tracing::debug!(key = %key, size = data.len(), "payload externalized");
                Ok(Payload::Object(key))
            }
            _ => Ok(Payload::Inline(Bytes::copy_from_slice(data))),
        }
    }

    /// Resolve a chunk's bytes, fetching externalized payloads.
    async fn payload_bytes(&self, chunk: &Chunk) -> Result<Bytes> {
        match &chunk.payload {
            Payload::Inline(bytes) => Ok(bytes.clone()),
            Payload::Object(key) => {
                let store = self.object_store.as_ref().ok_or_else(|| {
                    EngineError::Invariant(format!(
                        "chunk {} references object {key} but no object store is configured",
                        chunk.id
                    ))
                })?;
                Ok(store.get(namespaces::CHUNKS, key).await?)
            }
        }
    }

    /// Build the virtual image bounded by `version` and slice the requested
    /// window out of it.
    async fn read_image(
        &self,
        name: &str,
        offset: u64,
        size: u64,
        version: Option<&str>,
    ) -> Result<Bytes> {
        tracing::debug!(file = name, offset, size, version, "reading file");

        let conn = &self.db;
        let file_id = require_file(conn, name).await?;

        if let Some(tag) = version {
            if !meta::version_exists_for_file(conn, file_id, tag).await? {
                tracing::debug!(file = name, tag, "version tag not found");
                return Err(EngineError::VersionNotFound(tag.to_string()));
            }
        }

        let all_layers = meta::layers_by_file(conn, file_id).await?;
        let layers = match version {
            // The tagged layer is the last one included; it appears whole.
            Some(tag) => {
                let mut selected = Vec::new();
                for layer in all_layers {
                    let is_boundary = layer.tag.as_deref() == Some(tag);
                    selected.push(layer);
                    if is_boundary {
                        break;
                    }
                }
                selected
            }
            None => all_layers,
        };

        let layer_ids: Vec<i64> = layers.iter().map(|l| l.id).collect();
        let mut chunks_by_layer: HashMap<i64, Vec<Chunk>> =
            meta::chunks_by_layers(conn, &layer_ids).await?;

        let image_len = layers
            .iter()
            .flat_map(|l| chunks_by_layer.get(&l.id).into_iter().flatten())
            .map(|c| c.file_range.end)
            .max()
            .unwrap_or(0);

        // Apply chunks in layer order, then insertion order within a layer,
        // so later writes overwrite earlier bytes at the same offsets.
        let mut image = vec![0u8; image_len as usize];
        for layer in &layers {
            let Some(chunks) = chunks_by_layer.remove(&layer.id) else {
                continue;
            };
            for chunk in &chunks {
                let bytes = self.payload_bytes(chunk).await?;
                if bytes.len() as u64 != chunk.len() {
                    return Err(EngineError::Invariant(format!(
                        "chunk {} payload length {} does not match its range {}",
                        chunk.id,
                        bytes.len(),
                        chunk.file_range
                    )));
                }
                let start = chunk.file_range.start as usize;
                let end = chunk.file_range.end as usize;
                image[start..end].copy_from_slice(&bytes);
            }
        }

        if offset >= image_len {
            tracing::debug!(file = name, offset, image_len, "offset beyond image end");
            return Ok(Bytes::new());
        }

        let end = offset.saturating_add(size).min(image_len);
        let result = Bytes::copy_from_slice(&image[offset as usize..end as usize]);

        tracing::debug!(
            file = name,
            offset,
            end,
            returned = result.len(),
            version,
            "read complete"
        );
        Ok(result)
    }
}

/// Resolve a file name or fail with NotFound.
async fn require_file<C: ConnectionTrait>(conn: &C, name: &str) -> Result<i64> {
    meta::file_id_by_name(conn, name)
        .await?
        .ok_or_else(|| EngineError::NotFound(name.to_string()))
}

/// Virtual size: the maximum end offset across all chunks of the file.
async fn virtual_size<C: ConnectionTrait>(conn: &C, file_id: i64) -> Result<u64> {
    let ranges = meta::file_ranges(conn, file_id).await?;
    Ok(ranges.iter().map(|r| r.end).max().unwrap_or(0))
}

/// Content address for an externalized payload.
fn payload_key(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::storage::LocalStorage;
    use tempfile::TempDir;

    async fn open_manager(dir: &TempDir) -> Manager {
        let db_path = dir.path().join("meta.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());
        let db = db::init_database(&url).await.unwrap();
        Manager::new(db)
    }

    #[tokio::test]
    async fn test_insert_creates_initial_active_layer() {
        let dir = TempDir::new().unwrap();
        let sm = open_manager(&dir).await;

        let file_id = sm.insert_file("newfile").await.unwrap();
        let layers = sm.layers_of(file_id).await.unwrap();
        assert_eq!(layers.len(), 1);
        assert!(layers[0].active);
        assert_eq!(layers[0].tag, None);

        assert_eq!(sm.size_of("newfile").await.unwrap(), 0);

        let err = sm.insert_file("newfile").await.unwrap_err();
        assert!(matches!(err, EngineError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_basic_write_read() {
        let dir = TempDir::new().unwrap();
        let sm = open_manager(&dir).await;

        sm.insert_file("hello").await.unwrap();
        sm.write_file("hello", b"hello world", 0).await.unwrap();

        assert_eq!(sm.size_of("hello").await.unwrap(), 11);
        let data = sm.read_file("hello", 0, 11).await.unwrap();
        assert_eq!(&data[..], b"hello world");

        // Partial read
        let data = sm.read_file("hello", 0, 5).await.unwrap();
        assert_eq!(&data[..], b"hello");

        // Reading past the end is clamped, not an error
        let data = sm.read_file("hello", 6, 100).await.unwrap();
        assert_eq!(&data[..], b"world");
    }

    #[tokio::test]
    async fn test_read_missing_file_and_empty_file() {
        let dir = TempDir::new().unwrap();
        let sm = open_manager(&dir).await;

        let err = sm.read_file("nope", 0, 10).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));

        sm.insert_file("empty").await.unwrap();
        assert_eq!(sm.size_of("empty").await.unwrap(), 0);
        let data = sm.read_file("empty", 0, 10).await.unwrap();
        assert!(data.is_empty());
    }

    #[tokio::test]
    async fn test_masking_same_offset() {
        let dir = TempDir::new().unwrap();
        let sm = open_manager(&dir).await;

        sm.insert_file("mask").await.unwrap();
        sm.write_file("mask", b"initial data", 0).await.unwrap();
        sm.write_file("mask", b"overwritten!", 0).await.unwrap();

        let data = sm.read_file("mask", 0, 12).await.unwrap();
        assert_eq!(&data[..], b"overwritten!");

        // Shorter overwrite masks only its own range
        sm.write_file("mask", b"XY", 0).await.unwrap();
        let data = sm.read_file("mask", 0, 12).await.unwrap();
        assert_eq!(&data[..], b"XYerwritten!");
    }

    #[tokio::test]
    async fn test_within_and_overlapping_writes() {
        let dir = TempDir::new().unwrap();
        let sm = open_manager(&dir).await;

        sm.insert_file("overlap").await.unwrap();
        sm.write_file("overlap", &vec![b'*'; 4096], 0).await.unwrap();
        sm.write_file("overlap", &vec![b'%'; 3000], 3000).await.unwrap();
        sm.write_file("overlap", &vec![b'@'; 1024], 1024).await.unwrap();
        sm.write_file("overlap", &vec![b'-'; 2000], 2000).await.unwrap();

        let content = sm.read_file("overlap", 0, 6000).await.unwrap();
        assert_eq!(content.len(), 6000);
        assert!(content[..1024].iter().all(|&b| b == b'*'));
        assert!(content[1024..2000].iter().all(|&b| b == b'@'));
        assert!(content[2000..4000].iter().all(|&b| b == b'-'));
        assert!(content[4000..6000].iter().all(|&b| b == b'%'));
    }

    #[tokio::test]
    async fn test_checkpointed_versions() {
        let dir = TempDir::new().unwrap();
        let sm = open_manager(&dir).await;

        sm.insert_file("versioned").await.unwrap();
        sm.write_file("versioned", b"***************", 0).await.unwrap();
        sm.checkpoint("versioned", "v1").await.unwrap();

        sm.write_file("versioned", b"---------------", 0).await.unwrap();
        sm.checkpoint("versioned", "v2").await.unwrap();

        sm.write_file("versioned", b"@@@@@@@@@@@@@@@", 0).await.unwrap();

        let v1 = sm.read_file_at("versioned", 0, 100, "v1").await.unwrap();
        assert_eq!(&v1[..], b"***************");

        let v2 = sm.read_file_at("versioned", 0, 100, "v2").await.unwrap();
        assert_eq!(&v2[..], b"---------------");

        let latest = sm.read_file("versioned", 0, 100).await.unwrap();
        assert_eq!(&latest[..], b"@@@@@@@@@@@@@@@");

        let err = sm
            .read_file_at("versioned", 0, 100, "non_existent")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::VersionNotFound(_)));
        assert!(err.to_string().contains("version tag not found"));
    }

    #[tokio::test]
    async fn test_cross_layer_read() {
        let dir = TempDir::new().unwrap();
        let sm = open_manager(&dir).await;

        sm.insert_file("layered").await.unwrap();
        sm.write_file("layered", b"hello", 0).await.unwrap();
        sm.checkpoint("layered", "v1").await.unwrap();
        sm.write_file("layered", b" world", 5).await.unwrap();

        let data = sm.read_file("layered", 0, 11).await.unwrap();
        assert_eq!(&data[..], b"hello world");

        // The sealed snapshot is unaffected by the later write
        let v1 = sm.read_file_at("layered", 0, 11, "v1").await.unwrap();
        assert_eq!(&v1[..], b"hello");
    }

    #[tokio::test]
    async fn test_version_tag_scoped_to_file() {
        let dir = TempDir::new().unwrap();
        let sm = open_manager(&dir).await;

        sm.insert_file("a").await.unwrap();
        sm.insert_file("b").await.unwrap();
        sm.write_file("a", b"aaa", 0).await.unwrap();
        sm.checkpoint("a", "v1").await.unwrap();

        // v1 exists globally but labels no layer of b
        let err = sm.read_file_at("b", 0, 10, "v1").await.unwrap_err();
        assert!(matches!(err, EngineError::VersionNotFound(_)));
    }

    #[tokio::test]
    async fn test_size_monotonicity() {
        let dir = TempDir::new().unwrap();
        let sm = open_manager(&dir).await;

        sm.insert_file("grow").await.unwrap();

        sm.write_file("grow", b"start", 0).await.unwrap();
        assert_eq!(sm.size_of("grow").await.unwrap(), 5);

        sm.write_file("grow", b"middle", 5).await.unwrap();
        assert_eq!(sm.size_of("grow").await.unwrap(), 11);

        // Interior overwrite does not shrink the size
        sm.write_file("grow", b"end", 10).await.unwrap();
        assert_eq!(sm.size_of("grow").await.unwrap(), 13);

        sm.checkpoint("grow", "v1").await.unwrap();
        sm.write_file("grow", b"final", 13).await.unwrap();
        assert_eq!(sm.size_of("grow").await.unwrap(), 18);
    }

    #[tokio::test]
    async fn test_write_beyond_size_rejected() {
        let dir = TempDir::new().unwrap();
        let sm = open_manager(&dir).await;

        sm.insert_file("gap").await.unwrap();
        sm.write_file("gap", b"first", 0).await.unwrap();

        // Even one byte past the end is rejected
        let err = sm.write_file("gap", b"second", 10).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::OutOfRange { offset: 10, size: 5 }
        ));

        // The adapter-style gap fill: zeros up to the target, then the write
        sm.write_file("gap", &[0u8; 5], 5).await.unwrap();
        sm.write_file("gap", b"second", 10).await.unwrap();

        let content = sm.read_file("gap", 0, 16).await.unwrap();
        assert_eq!(&content[..], b"first\x00\x00\x00\x00\x00second");
    }

    #[tokio::test]
    async fn test_truncate() {
        let dir = TempDir::new().unwrap();
        let sm = open_manager(&dir).await;

        sm.insert_file("trunc").await.unwrap();
        sm.write_file("trunc", b"data", 0).await.unwrap();

        // Same size: no-op
        sm.truncate("trunc", 4).await.unwrap();
        assert_eq!(sm.size_of("trunc").await.unwrap(), 4);

        // Grow: zero-filled tail
        sm.truncate("trunc", 8).await.unwrap();
        assert_eq!(sm.size_of("trunc").await.unwrap(), 8);
        let content = sm.read_file("trunc", 0, 8).await.unwrap();
        assert_eq!(&content[..], b"data\x00\x00\x00\x00");

        // Shrink: unsupported
        let err = sm.truncate("trunc", 2).await.unwrap_err();
        assert!(matches!(err, EngineError::Unsupported { .. }));
        assert_eq!(sm.size_of("trunc").await.unwrap(), 8);

        let err = sm.truncate("missing", 10).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_isolation() {
        let dir = TempDir::new().unwrap();
        let sm = open_manager(&dir).await;

        for name in ["del_a", "del_b", "del_c"] {
            sm.insert_file(name).await.unwrap();
            sm.write_file(name, format!("data for {name}").as_bytes(), 0)
                .await
                .unwrap();
        }

        sm.delete_file("del_b").await.unwrap();

        let files = sm.get_all_files().await.unwrap();
        let names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["del_a", "del_c"]);

        // Neighbors stay intact
        let a = sm.read_file("del_a", 0, 100).await.unwrap();
        assert_eq!(&a[..], b"data for del_a");
        let c = sm.read_file("del_c", 0, 100).await.unwrap();
        assert_eq!(&c[..], b"data for del_c");

        // The deleted file is gone for reads and writes
        assert!(matches!(
            sm.read_file("del_b", 0, 10).await.unwrap_err(),
            EngineError::NotFound(_)
        ));
        assert!(matches!(
            sm.write_file("del_b", b"x", 0).await.unwrap_err(),
            EngineError::NotFound(_)
        ));

        // Deleting a missing file is a no-op
        sm.delete_file("del_b").await.unwrap();
    }

    #[tokio::test]
    async fn test_checkpoint_failure_leaves_no_partial_state() {
        let dir = TempDir::new().unwrap();
        let sm = open_manager(&dir).await;

        let file_id = sm.insert_file("atomic").await.unwrap();
        sm.write_file("atomic", b"payload", 0).await.unwrap();
        sm.checkpoint("atomic", "v1").await.unwrap();
        sm.write_file("atomic", b"more", 7).await.unwrap();

        let before = sm.layers_of(file_id).await.unwrap();

        // The version insert fails mid-transaction on the duplicate tag; the
        // seal and the new layer must roll back with it.
        let err = sm.checkpoint("atomic", "v1").await.unwrap_err();
        assert!(matches!(err, EngineError::AlreadyExists(_)));

        let after = sm.layers_of(file_id).await.unwrap();
        assert_eq!(before, after);
        assert!(after.last().unwrap().active);

        let content = sm.read_file("atomic", 0, 100).await.unwrap();
        assert_eq!(&content[..], b"payloadmore");

        // Checkpoint on another file cannot reuse the tag either
        sm.insert_file("atomic2").await.unwrap();
        let err = sm.checkpoint("atomic2", "v1").await.unwrap_err();
        assert!(matches!(err, EngineError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_checkpoint_missing_file() {
        let dir = TempDir::new().unwrap();
        let sm = open_manager(&dir).await;

        let err = sm.checkpoint("ghost", "v1").await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_persistence_across_managers() {
        let dir = TempDir::new().unwrap();

        let expected = b"initial datamore data";
        {
            let sm = open_manager(&dir).await;
            sm.insert_file("persist").await.unwrap();
            sm.write_file("persist", b"initial data", 0).await.unwrap();
            sm.checkpoint("persist", "v1").await.unwrap();
            sm.write_file("persist", b"more data", 12).await.unwrap();

            let content = sm.read_file("persist", 0, 100).await.unwrap();
            assert_eq!(&content[..], expected);
        }

        // A fresh manager over the same store sees identical bytes
        let sm = open_manager(&dir).await;
        assert_eq!(sm.size_of("persist").await.unwrap(), expected.len() as u64);
        let content = sm.read_file("persist", 0, 100).await.unwrap();
        assert_eq!(&content[..], expected);

        let v1 = sm.read_file_at("persist", 0, 100, "v1").await.unwrap();
        assert_eq!(&v1[..], b"initial data");

        // And keeps accepting writes
        sm.write_file("persist", b"!", expected.len() as u64)
            .await
            .unwrap();
        assert_eq!(
            sm.size_of("persist").await.unwrap(),
            expected.len() as u64 + 1
        );
    }

    #[tokio::test]
    async fn test_externalized_payloads() {
        let dir = TempDir::new().unwrap();
        let objects = TempDir::new().unwrap();

        let db_path = dir.path().join("meta.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());
        let db = db::init_database(&url).await.unwrap();
        let store = Arc::new(LocalStorage::new(objects.path().to_path_buf()));
        let sm = Manager::new(db).with_object_store(store.clone(), 16);

        sm.insert_file("ext").await.unwrap();
        // Below the threshold: stays inline
        sm.write_file("ext", b"small", 0).await.unwrap();
        // At/above the threshold: goes to the object store
        let big = vec![b'Z'; 64];
        sm.write_file("ext", &big, 5).await.unwrap();

        let key = payload_key(&big);
        assert!(store.exists(namespaces::CHUNKS, &key).await.unwrap());

        let content = sm.read_file("ext", 0, 100).await.unwrap();
        assert_eq!(&content[..5], b"small");
        assert_eq!(&content[5..], &big[..]);

        // Rewriting the same bytes reuses the same content address
        sm.write_file("ext", &big, 0).await.unwrap();
        let content = sm.read_file("ext", 0, 64).await.unwrap();
        assert_eq!(&content[..], &big[..]);
    }

    #[tokio::test]
    async fn test_concurrent_writers_and_readers() {
        let dir = TempDir::new().unwrap();
        let sm = Arc::new(open_manager(&dir).await);

        for i in 0..4 {
            sm.insert_file(&format!("conc_{i}")).await.unwrap();
        }

        let mut handles = Vec::new();
        for i in 0..4 {
            let sm = sm.clone();
            handles.push(tokio::spawn(async move {
                let name = format!("conc_{i}");
                for round in 0..10u64 {
                    let data = vec![b'a' + i as u8; 8];
                    sm.write_file(&name, &data, round * 8).await.unwrap();
                    let read = sm.read_file(&name, 0, (round + 1) * 8).await.unwrap();
                    assert_eq!(read.len() as u64, (round + 1) * 8);
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        for i in 0..4 {
            let name = format!("conc_{i}");
            assert_eq!(sm.size_of(&name).await.unwrap(), 80);
            let content = sm.read_file(&name, 0, 80).await.unwrap();
            assert!(content.iter().all(|&b| b == b'a' + i as u8));
        }
    }
}
