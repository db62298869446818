//! Database schema definitions.

use crate::storage::StorageError;
use crate::storage::db::SqlitePool;

/// SQL statement for creating the samples table.
///
/// One row per resolved probe. `response_time` is `-1` for lost probes.
pub const SAMPLES_TABLE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS samples (
    peer_id       INTEGER NOT NULL,
    time          INTEGER NOT NULL,
    response_time INTEGER NOT NULL
)
"#;

/// Index backing per-peer range scans and the retention sweep.
pub const SAMPLES_INDEX_DDL: &str = r#"
CREATE INDEX IF NOT EXISTS idx_samples_peer_time ON samples (peer_id, time)
"#;

/// Initialize the database schema.
///
/// Creates all necessary tables and indexes if they don't exist.
pub async fn init_schema(pool: &SqlitePool) -> Result<(), StorageError> {
    sqlx::query(SAMPLES_TABLE_DDL).execute(pool.inner()).await?;
    sqlx::query(SAMPLES_INDEX_DDL).execute(pool.inner()).await?;

    tracing::info!("Database schema initialized");
    Ok(())
}
