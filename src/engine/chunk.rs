//! Chunk descriptor and byte-range representation.

use std::fmt;

use bytes::Bytes;

use crate::db::entities;
use crate::error::{EngineError, Result};

/// Half-open byte interval `[start, end)`.
///
/// Stored in the metadata store as the literal text `"[<lo>,<hi>)"` and
/// round-tripped losslessly.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// Parse the stored `"[lo,hi)"` text form.
    pub fn parse(text: &str) -> Result<Self> {
        let inner = text
            .strip_prefix('[')
            .and_then(|t| t.strip_suffix(')'))
            .ok_or_else(|| EngineError::Invariant(format!("malformed range text: {text:?}")))?;
        let (lo, hi) = inner
            .split_once(',')
            .ok_or_else(|| EngineError::Invariant(format!("malformed range text: {text:?}")))?;
        let start = lo
            .trim()
            .parse::<u64>()
            .map_err(|_| EngineError::Invariant(format!("malformed range bound: {lo:?}")))?;
        let end = hi
            .trim()
            .parse::<u64>()
            .map_err(|_| EngineError::Invariant(format!("malformed range bound: {hi:?}")))?;
        Ok(Self { start, end })
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{},{})", self.start, self.end)
    }
}

/// Where a chunk's bytes live.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    /// Bytes stored inline in the chunk row
    Inline(Bytes),
    /// Bytes stored in the object payload store under this key
    Object(String),
}

/// An immutable record of a single write.
#[derive(Clone, Debug)]
pub struct Chunk {
    pub id: i64,
    pub layer_id: i64,
    /// File-absolute offset of the write
    pub offset: u64,
    pub payload: Payload,
    /// Range relative to the owning layer's base
    pub layer_range: ByteRange,
    /// File-absolute range
    pub file_range: ByteRange,
}

impl Chunk {
    pub fn len(&self) -> u64 {
        self.file_range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.file_range.is_empty()
    }
}

impl TryFrom<entities::chunk::Model> for Chunk {
    type Error = EngineError;

    fn try_from(row: entities::chunk::Model) -> Result<Self> {
        let payload = match (row.data, row.object_key) {
            (Some(bytes), None) => Payload::Inline(Bytes::from(bytes)),
            (None, Some(key)) => Payload::Object(key),
            (Some(_), Some(_)) => {
                return Err(EngineError::Invariant(format!(
                    "chunk {} carries both inline data and an object key",
                    row.id
                )))
            }
            (None, None) => {
                return Err(EngineError::Invariant(format!(
                    "chunk {} carries neither inline data nor an object key",
                    row.id
                )))
            }
        };

        Ok(Self {
            id: row.id,
            layer_id: row.snapshot_layer_id,
            offset: row.offset_value as u64,
            payload,
            layer_range: ByteRange::parse(&row.layer_range)?,
            file_range: ByteRange::parse(&row.file_range)?,
        })
    }
}
