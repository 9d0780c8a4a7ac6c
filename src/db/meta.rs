//! Typed operations over the metadata tables.
//!
//! Every function is generic over [`ConnectionTrait`] so it can run either on
//! the pooled connection or inside a caller-supplied transaction. Range
//! parsing/formatting and row decoding are hidden here; callers see
//! [`Layer`] and [`Chunk`] descriptors.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, JoinType, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, RelationTrait, Set,
};

use crate::db::entities::{chunk, file, snapshot_layer, version};
use crate::engine::{ByteRange, Chunk, Layer, Payload};
use crate::error::Result;

fn now_epoch() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Insert a file row and return its id.
pub async fn insert_file<C: ConnectionTrait>(conn: &C, name: &str) -> Result<i64> {
    let row = file::ActiveModel {
        name: Set(name.to_string()),
        ..Default::default()
    }
    .insert(conn)
    .await?;
    Ok(row.id)
}

/// Look up a file id by name; `None` when the file does not exist.
pub async fn file_id_by_name<C: ConnectionTrait>(conn: &C, name: &str) -> Result<Option<i64>> {
    let row = file::Entity::find()
        .filter(file::Column::Name.eq(name))
        .one(conn)
        .await?;
    Ok(row.map(|f| f.id))
}

/// All file rows.
pub async fn all_files<C: ConnectionTrait>(conn: &C) -> Result<Vec<file::Model>> {
    Ok(file::Entity::find()
        .order_by_asc(file::Column::Id)
        .all(conn)
        .await?)
}

/// Insert a new empty active layer for the file and return its id.
pub async fn insert_active_layer<C: ConnectionTrait>(conn: &C, file_id: i64) -> Result<i64> {
    let row = snapshot_layer::ActiveModel {
        file_id: Set(file_id),
        active: Set(true),
        version_id: Set(None),
        created_at: Set(now_epoch()),
        ..Default::default()
    }
    .insert(conn)
    .await?;
    Ok(row.id)
}

/// Seal a layer: flip active off and attach the version id.
pub async fn seal_layer<C: ConnectionTrait>(conn: &C, layer_id: i64, version_id: i64) -> Result<()> {
    snapshot_layer::Entity::update_many()
        .col_expr(snapshot_layer::Column::Active, Expr::value(false))
        .col_expr(snapshot_layer::Column::VersionId, Expr::value(version_id))
        .filter(snapshot_layer::Column::Id.eq(layer_id))
        .exec(conn)
        .await?;
    Ok(())
}

/// Insert a version row and return its id.
pub async fn insert_version<C: ConnectionTrait>(conn: &C, tag: &str) -> Result<i64> {
    let row = version::ActiveModel {
        tag: Set(tag.to_string()),
        created_at: Set(now_epoch()),
        ..Default::default()
    }
    .insert(conn)
    .await?;
    Ok(row.id)
}

/// Whether a version tag exists at all.
pub async fn version_exists<C: ConnectionTrait>(conn: &C, tag: &str) -> Result<bool> {
    let count = version::Entity::find()
        .filter(version::Column::Tag.eq(tag))
        .count(conn)
        .await?;
    Ok(count > 0)
}

/// Whether a version tag labels a sealed layer of this file.
pub async fn version_exists_for_file<C: ConnectionTrait>(
    conn: &C,
    file_id: i64,
    tag: &str,
) -> Result<bool> {
    let count = snapshot_layer::Entity::find()
        .join(JoinType::InnerJoin, snapshot_layer::Relation::Version.def())
        .filter(snapshot_layer::Column::FileId.eq(file_id))
        .filter(version::Column::Tag.eq(tag))
        .count(conn)
        .await?;
    Ok(count > 0)
}

/// Id of the file's active layer, if any.
pub async fn active_layer_id<C: ConnectionTrait>(conn: &C, file_id: i64) -> Result<Option<i64>> {
    let row = snapshot_layer::Entity::find()
        .filter(snapshot_layer::Column::FileId.eq(file_id))
        .filter(snapshot_layer::Column::Active.eq(true))
        .order_by_asc(snapshot_layer::Column::Id)
        .one(conn)
        .await?;
    Ok(row.map(|l| l.id))
}

/// All layers of a file in creation order, with version tags resolved.
pub async fn layers_by_file<C: ConnectionTrait>(conn: &C, file_id: i64) -> Result<Vec<Layer>> {
    let rows = snapshot_layer::Entity::find()
        .filter(snapshot_layer::Column::FileId.eq(file_id))
        .order_by_asc(snapshot_layer::Column::Id)
        .find_also_related(version::Entity)
        .all(conn)
        .await?;
    Ok(rows
        .into_iter()
        .map(|(layer, version)| Layer::from_rows(layer, version))
        .collect())
}

/// Insert a chunk row referencing the given layer.
pub async fn insert_chunk<C: ConnectionTrait>(
    conn: &C,
    layer_id: i64,
    offset: u64,
    payload: &Payload,
    layer_range: ByteRange,
    file_range: ByteRange,
) -> Result<i64> {
    let (data, object_key) = match payload {
        Payload::Inline(bytes) => (Some(bytes.to_vec()), None),
        Payload::Object(key) => (None, Some(key.clone())),
    };
    let row = chunk::ActiveModel {
        snapshot_layer_id: Set(layer_id),
        offset_value: Set(offset as i64),
        data: Set(data),
        object_key: Set(object_key),
        layer_range: Set(layer_range.to_string()),
        file_range: Set(file_range.to_string()),
        ..Default::default()
    }
    .insert(conn)
    .await?;
    Ok(row.id)
}

/// Chunks of the given layers, grouped by layer id.
///
/// Within each group chunks come back in insertion order (primary key
/// ascending), which is the order the read path applies them in.
pub async fn chunks_by_layers<C: ConnectionTrait>(
    conn: &C,
    layer_ids: &[i64],
) -> Result<HashMap<i64, Vec<Chunk>>> {
    let mut grouped: HashMap<i64, Vec<Chunk>> = HashMap::new();
    if layer_ids.is_empty() {
        return Ok(grouped);
    }

    let rows = chunk::Entity::find()
        .filter(chunk::Column::SnapshotLayerId.is_in(layer_ids.to_vec()))
        .order_by_asc(chunk::Column::SnapshotLayerId)
        .order_by_asc(chunk::Column::Id)
        .all(conn)
        .await?;

    for row in rows {
        let chunk = Chunk::try_from(row)?;
        grouped.entry(chunk.layer_id).or_default().push(chunk);
    }
    Ok(grouped)
}

/// Base of a layer: the minimum lower bound of `file_range` among its chunks.
/// `None` for an empty layer.
pub async fn layer_base<C: ConnectionTrait>(conn: &C, layer_id: i64) -> Result<Option<u64>> {
    let ranges: Vec<String> = chunk::Entity::find()
        .select_only()
        .column(chunk::Column::FileRange)
        .filter(chunk::Column::SnapshotLayerId.eq(layer_id))
        .into_tuple()
        .all(conn)
        .await?;

    let mut base: Option<u64> = None;
    for text in &ranges {
        let range = ByteRange::parse(text)?;
        base = Some(base.map_or(range.start, |b| b.min(range.start)));
    }
    Ok(base)
}

/// File-absolute ranges of every chunk of the file, ordered by layer
/// creation time, then by range lower bound.
///
/// The lower bound lives inside the range text, so the secondary sort
/// happens here after parsing rather than in SQL.
pub async fn file_ranges<C: ConnectionTrait>(conn: &C, file_id: i64) -> Result<Vec<ByteRange>> {
    let rows: Vec<(i64, String)> = chunk::Entity::find()
        .select_only()
        .column(snapshot_layer::Column::CreatedAt)
        .column(chunk::Column::FileRange)
        .join(JoinType::InnerJoin, chunk::Relation::Layer.def())
        .filter(snapshot_layer::Column::FileId.eq(file_id))
        .into_tuple()
        .all(conn)
        .await?;

    let mut parsed = Vec::with_capacity(rows.len());
    for (created_at, text) in &rows {
        parsed.push((*created_at, ByteRange::parse(text)?));
    }
    parsed.sort_by_key(|(created_at, range)| (*created_at, range.start));
    Ok(parsed.into_iter().map(|(_, range)| range).collect())
}

/// Delete all chunks belonging to the file's layers.
pub async fn delete_chunks_by_file<C: ConnectionTrait>(conn: &C, file_id: i64) -> Result<()> {
    let layer_ids: Vec<i64> = snapshot_layer::Entity::find()
        .select_only()
        .column(snapshot_layer::Column::Id)
        .filter(snapshot_layer::Column::FileId.eq(file_id))
        .into_tuple()
        .all(conn)
        .await?;
    if layer_ids.is_empty() {
        return Ok(());
    }
    chunk::Entity::delete_many()
        .filter(chunk::Column::SnapshotLayerId.is_in(layer_ids))
        .exec(conn)
        .await?;
    Ok(())
}

/// Delete all layers of the file.
pub async fn delete_layers_by_file<C: ConnectionTrait>(conn: &C, file_id: i64) -> Result<()> {
    snapshot_layer::Entity::delete_many()
        .filter(snapshot_layer::Column::FileId.eq(file_id))
        .exec(conn)
        .await?;
    Ok(())
}

/// Delete the file row itself.
pub async fn delete_file<C: ConnectionTrait>(conn: &C, file_id: i64) -> Result<()> {
    file::Entity::delete_many()
        .filter(file::Column::Id.eq(file_id))
        .exec(conn)
        .await?;
    Ok(())
}
