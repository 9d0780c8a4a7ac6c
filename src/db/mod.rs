//! Metadata store: SQLite/PostgreSQL persistence using SeaORM

pub mod entities;
pub mod meta;

use sea_orm::{ConnectionTrait, Database, DatabaseConnection, DbErr, Statement};

/// Connect to the metadata store and, for SQLite, create the schema.
///
/// PostgreSQL deployments provision the schema externally; only the SQLite
/// backend (development, tests, CLI default) is bootstrapped here.
pub async fn init_database(db_url: &str) -> Result<DatabaseConnection, DbErr> {
    tracing::info!("Connecting to metadata store: {}", db_url);

    let db = Database::connect(db_url).await?;

    if db.get_database_backend() == sea_orm::DatabaseBackend::Sqlite {
        create_tables(&db).await?;
    } else {
        tracing::debug!("Non-SQLite backend, schema is managed externally");
    }

    Ok(db)
}

/// Create all tables if they don't exist
async fn create_tables(db: &DatabaseConnection) -> Result<(), DbErr> {
    // Files table
    db.execute(Statement::from_string(
        db.get_database_backend(),
        r#"
        CREATE TABLE IF NOT EXISTS files (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE
        )
        "#
        .to_string(),
    ))
    .await?;

    // Versions table
    db.execute(Statement::from_string(
        db.get_database_backend(),
        r#"
        CREATE TABLE IF NOT EXISTS versions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            tag TEXT NOT NULL UNIQUE,
            created_at INTEGER NOT NULL
        )
        "#
        .to_string(),
    ))
    .await?;

    // Snapshot layers table
    db.execute(Statement::from_string(
        db.get_database_backend(),
        r#"
        CREATE TABLE IF NOT EXISTS snapshot_layers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            file_id INTEGER NOT NULL,
            active INTEGER NOT NULL DEFAULT 0,
            version_id INTEGER,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (file_id) REFERENCES files(id) ON DELETE CASCADE,
            FOREIGN KEY (version_id) REFERENCES versions(id)
        )
        "#
        .to_string(),
    ))
    .await?;

    // Create index for layer lookups
    db.execute(Statement::from_string(
        db.get_database_backend(),
        r#"CREATE INDEX IF NOT EXISTS idx_snapshot_layers_file ON snapshot_layers(file_id)"#
            .to_string(),
    ))
    .await?;

    // At most one active layer per file
    db.execute(Statement::from_string(
        db.get_database_backend(),
        r#"CREATE UNIQUE INDEX IF NOT EXISTS idx_snapshot_layers_one_active
           ON snapshot_layers(file_id) WHERE active = 1"#
            .to_string(),
    ))
    .await?;

    // Chunks table
    db.execute(Statement::from_string(
        db.get_database_backend(),
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            snapshot_layer_id INTEGER NOT NULL,
            offset_value INTEGER NOT NULL,
            data BLOB,
            object_key TEXT,
            layer_range TEXT NOT NULL,
            file_range TEXT NOT NULL,
            FOREIGN KEY (snapshot_layer_id) REFERENCES snapshot_layers(id) ON DELETE CASCADE
        )
        "#
        .to_string(),
    ))
    .await?;

    // Create index for chunk lookups
    db.execute(Statement::from_string(
        db.get_database_backend(),
        r#"CREATE INDEX IF NOT EXISTS idx_chunks_layer ON chunks(snapshot_layer_id)"#.to_string(),
    ))
    .await?;

    tracing::info!("Metadata store tables initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_init_creates_schema() {
        let db = init_database("sqlite::memory:").await.unwrap();

        // Tables accept inserts once the schema exists
        db.execute(Statement::from_string(
            db.get_database_backend(),
            "INSERT INTO files (name) VALUES ('schema_probe')".to_string(),
        ))
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_single_active_layer_index() {
        let db = init_database("sqlite::memory:").await.unwrap();

        db.execute(Statement::from_string(
            db.get_database_backend(),
            "INSERT INTO files (name) VALUES ('f')".to_string(),
        ))
        .await
        .unwrap();
        db.execute(Statement::from_string(
            db.get_database_backend(),
            "INSERT INTO snapshot_layers (file_id, active, created_at) VALUES (1, 1, 0)".to_string(),
        ))
        .await
        .unwrap();

        // A second active layer for the same file violates the partial index
        let res = db
            .execute(Statement::from_string(
                db.get_database_backend(),
                "INSERT INTO snapshot_layers (file_id, active, created_at) VALUES (1, 1, 0)"
                    .to_string(),
            ))
            .await;
        assert!(res.is_err());
    }
}
