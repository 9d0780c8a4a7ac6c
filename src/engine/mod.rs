//! The chunk/layer overlay engine.
//!
//! Virtual files are materialized on the fly from an ordered stack of
//! immutable snapshot layers plus one mutable active layer per file. Each
//! write is recorded as a chunk at an absolute offset; reads merge chunks
//! from all layers up to a selected version, later writes masking earlier
//! ones.

#![allow(dead_code)] // The CLI adapter consumes only part of the engine API

mod chunk;
mod layer;
mod manager;

pub use chunk::{ByteRange, Chunk, Payload};
pub use layer::Layer;
pub use manager::{FileInfo, Manager};
