//! SQLite connection management.

mod sqlite;

pub use sqlite::SqlitePool;
