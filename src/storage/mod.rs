//! Object payload store.
//!
//! Chunk payloads that are too large to inline in the metadata store are
//! written to a flat key→bytes backend. Two implementations are provided:
//! - Local filesystem (default for development and tests)
//! - S3-compatible object storage (AWS S3, MinIO, R2, etc.)

#![allow(dead_code)] // Backend API methods not all used by every deployment

mod backend;
mod config;
mod local;
mod s3;

pub use backend::{namespaces, StorageBackend, StorageError, StorageResult};
pub use config::{StorageConfig, StorageType};
pub use local::LocalStorage;
pub use s3::{S3Config, S3Storage};
