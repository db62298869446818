//! Storage errors.

use std::path::PathBuf;

use thiserror::Error;

/// Failure in the sample store. Logged by callers; never stops measurement.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The directory holding the database file could not be created.
    #[error("cannot create database directory {}: {source}", path.display())]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
