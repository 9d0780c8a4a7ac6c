//! Database entities

pub mod chunk;
pub mod file;
pub mod snapshot_layer;
pub mod version;

pub use chunk::Entity as Chunk;
pub use file::Entity as File;
pub use snapshot_layer::Entity as SnapshotLayer;
pub use version::Entity as Version;
