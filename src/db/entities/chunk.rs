//! Chunk entity (the bytes of a single write at an absolute offset)

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "chunks")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub snapshot_layer_id: i64,
    pub offset_value: i64,           // File-absolute write offset
    pub data: Option<Vec<u8>>,       // Inline payload, or
    pub object_key: Option<String>,  // key of an externalized payload
    pub layer_range: String,         // "[lo,hi)" relative to the layer base
    pub file_range: String,          // "[lo,hi)" file-absolute
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::snapshot_layer::Entity",
        from = "Column::SnapshotLayerId",
        to = "super::snapshot_layer::Column::Id"
    )]
    Layer,
}

impl Related<super::snapshot_layer::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Layer.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
