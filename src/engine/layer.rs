//! Snapshot layer descriptor.

use crate::db::entities;

/// In-memory view of a snapshot layer row, with the version tag resolved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Layer {
    pub id: i64,
    pub file_id: i64,
    /// Whether this is the layer currently accepting writes
    pub active: bool,
    pub version_id: Option<i64>,
    /// Tag of the sealing version, `None` for the active layer
    pub tag: Option<String>,
}

impl Layer {
    pub fn from_rows(
        layer: entities::snapshot_layer::Model,
        version: Option<entities::version::Model>,
    ) -> Self {
        Self {
            id: layer.id,
            file_id: layer.file_id,
            active: layer.active,
            version_id: layer.version_id,
            tag: version.map(|v| v.tag),
        }
    }
}
