//! Sample database connections.
//!
//! One pool per process, shared by the correlator (writes) and the web
//! handlers (reads).

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool as SqlxPool, SqlitePoolOptions,
    SqliteSynchronous,
};

use crate::storage::StorageError;

/// Pool size for file databases.
const FILE_POOL_SIZE: u32 = 5;

/// How long a caller waits for a free connection.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// How long a statement waits on a locked database before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Pooled SQLite handle in WAL mode.
#[derive(Clone)]
pub struct SqlitePool {
    inner: SqlxPool,
}

impl std::fmt::Debug for SqlitePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlitePool")
            .field("size", &self.inner.size())
            .finish_non_exhaustive()
    }
}

fn is_in_memory(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

fn ensure_parent_dir(file: &Path) -> Result<(), StorageError> {
    match file.parent() {
        Some(parent) if !parent.as_os_str().is_empty() && !parent.exists() => {
            std::fs::create_dir_all(parent).map_err(|source| StorageError::Directory {
                path: parent.to_path_buf(),
                source,
            })
        }
        _ => Ok(()),
    }
}

impl SqlitePool {
    /// Open (creating if needed) the database at `url`, e.g.
    /// `sqlite:data/pingmon.db?mode=rwc` or `sqlite::memory:`.
    ///
    /// In-memory databases get a single connection that is never recycled,
    /// since the data lives only as long as that connection.
    pub async fn connect(url: &str) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(url)?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(BUSY_TIMEOUT)
            .create_if_missing(true);

        let pool_options = if is_in_memory(url) {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            ensure_parent_dir(options.get_filename())?;
            SqlitePoolOptions::new().max_connections(FILE_POOL_SIZE)
        };

        let inner = pool_options
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect_with(options)
            .await?;
        tracing::debug!(url, "SQLite pool connected");

        Ok(Self { inner })
    }

    /// Underlying sqlx pool for running queries.
    #[inline]
    pub fn inner(&self) -> &SqlxPool {
        &self.inner
    }

    /// Close every connection, waiting for in-flight queries.
    pub async fn close(&self) {
        self.inner.close().await;
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}
