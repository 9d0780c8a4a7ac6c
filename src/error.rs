use thiserror::Error;

use crate::storage::StorageError;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("file not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("write offset {offset} is beyond file size {size}")]
    OutOfRange { offset: u64, size: u64 },

    #[error("shrinking is not supported: current size {current}, requested {requested}")]
    Unsupported { current: u64, requested: u64 },

    #[error("version tag not found: {0}")]
    VersionNotFound(String),

    #[error("metadata store error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("object store error: {0}")]
    ObjectStore(#[from] StorageError),

    #[error("invariant violated: {0}")]
    Invariant(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
