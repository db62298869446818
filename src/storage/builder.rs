//! Storage builder and handles.
//!
//! Provides a builder pattern for constructing the storage layer
//! and a handles struct for accessing the sample store.

use std::sync::Arc;

use crate::storage::StorageError;
use crate::storage::db::SqlitePool;
use crate::storage::sample_store::SqliteSampleStore;
use crate::storage::schema::init_schema;

/// Builder for constructing the storage layer.
pub struct StorageBuilder {
    url: String,
}

impl StorageBuilder {
    /// Create a new storage builder from a SQLite URL
    /// (e.g. `sqlite:pingmon.db?mode=rwc` or `sqlite::memory:`).
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// Connect, initialize the schema and return handles.
    pub async fn build(self) -> Result<StorageHandles, StorageError> {
        let pool = SqlitePool::connect(&self.url).await?;
        init_schema(&pool).await?;

        Ok(StorageHandles {
            samples: Arc::new(SqliteSampleStore::new(pool.clone())),
            pool,
        })
    }
}

/// Handles to the storage layer.
pub struct StorageHandles {
    /// Sample store shared by the correlator and the query service.
    pub samples: Arc<SqliteSampleStore>,
    pool: SqlitePool,
}

impl std::fmt::Debug for StorageHandles {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageHandles").finish_non_exhaustive()
    }
}

impl StorageHandles {
    /// Gracefully shutdown the storage layer.
    ///
    /// Waits for in-flight queries and closes every pooled connection.
    pub async fn shutdown(self) -> Result<(), StorageError> {
        self.pool.close().await;
        tracing::info!("Storage closed");
        Ok(())
    }
}
