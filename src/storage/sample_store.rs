//! Sample persistence.
//!
//! [`SampleStore`] is the contract the correlator writes through and the
//! time-series service reads through; [`SqliteSampleStore`] implements it on
//! top of the sqlx pool.

use async_trait::async_trait;

use crate::monitor::PeerId;
use crate::storage::db::SqlitePool;
use crate::storage::{Sample, StorageError, TimeRange};

/// Persistence contract for probe samples.
#[async_trait]
pub trait SampleStore: Send + Sync + 'static {
    /// Append one sample.
    async fn insert(&self, sample: &Sample) -> Result<(), StorageError>;

    /// Samples for a peer ordered by time ascending, optionally limited to
    /// an inclusive range.
    async fn query(
        &self,
        peer_id: PeerId,
        range: Option<TimeRange>,
    ) -> Result<Vec<Sample>, StorageError>;

    /// Delete every sample older than `timestamp_ms`. Returns rows removed.
    async fn delete_older_than(&self, timestamp_ms: i64) -> Result<u64, StorageError>;

    /// Mean response time over successful samples and the percentage of
    /// successful samples among all samples in range.
    async fn average_and_success_rate(
        &self,
        peer_id: PeerId,
        range: Option<TimeRange>,
    ) -> Result<(f64, f64), StorageError>;

    /// Cheap round trip used by readiness probes.
    async fn health_check(&self) -> Result<(), StorageError>;
}

/// SQLite-backed [`SampleStore`].
#[derive(Clone)]
pub struct SqliteSampleStore {
    pool: SqlitePool,
}

impl std::fmt::Debug for SqliteSampleStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteSampleStore").finish_non_exhaustive()
    }
}

impl SqliteSampleStore {
    /// Create a store over an initialized pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

type SampleRow = (i64, i64, i64);

fn row_to_sample((peer_id, time, response_time): SampleRow) -> Sample {
    Sample::new(peer_id, time, response_time)
}

#[async_trait]
impl SampleStore for SqliteSampleStore {
    async fn insert(&self, sample: &Sample) -> Result<(), StorageError> {
        sqlx::query("INSERT INTO samples (peer_id, time, response_time) VALUES (?, ?, ?)")
            .bind(sample.peer_id)
            .bind(sample.timestamp_ms)
            .bind(sample.response_time)
            .execute(self.pool.inner())
            .await?;
        Ok(())
    }

    async fn query(
        &self,
        peer_id: PeerId,
        range: Option<TimeRange>,
    ) -> Result<Vec<Sample>, StorageError> {
        let rows: Vec<SampleRow> = match range {
            Some(range) => {
                sqlx::query_as(
                    "SELECT peer_id, time, response_time FROM samples
                     WHERE peer_id = ? AND time >= ? AND time <= ?
                     ORDER BY time ASC",
                )
                .bind(peer_id)
                .bind(range.start)
                .bind(range.stop)
                .fetch_all(self.pool.inner())
                .await?
            }
            None => {
                sqlx::query_as(
                    "SELECT peer_id, time, response_time FROM samples
                     WHERE peer_id = ?
                     ORDER BY time ASC",
                )
                .bind(peer_id)
                .fetch_all(self.pool.inner())
                .await?
            }
        };

        Ok(rows.into_iter().map(row_to_sample).collect())
    }

    async fn delete_older_than(&self, timestamp_ms: i64) -> Result<u64, StorageError> {
        let result = sqlx::query("DELETE FROM samples WHERE time < ?")
            .bind(timestamp_ms)
            .execute(self.pool.inner())
            .await?;
        Ok(result.rows_affected())
    }

    async fn average_and_success_rate(
        &self,
        peer_id: PeerId,
        range: Option<TimeRange>,
    ) -> Result<(f64, f64), StorageError> {
        const SELECT: &str = "SELECT
                AVG(CASE WHEN response_time > 0 THEN response_time END),
                COUNT(*),
                SUM(CASE WHEN response_time > 0 THEN 1 ELSE 0 END)
             FROM samples WHERE peer_id = ?";

        let (average, total, successful): (Option<f64>, i64, Option<i64>) = match range {
            Some(range) => {
                sqlx::query_as(&format!("{SELECT} AND time >= ? AND time <= ?"))
                    .bind(peer_id)
                    .bind(range.start)
                    .bind(range.stop)
                    .fetch_one(self.pool.inner())
                    .await?
            }
            None => {
                sqlx::query_as(SELECT)
                    .bind(peer_id)
                    .fetch_one(self.pool.inner())
                    .await?
            }
        };

        let uptime = if total > 0 {
            successful.unwrap_or(0) as f64 * 100.0 / total as f64
        } else {
            0.0
        };

        Ok((average.unwrap_or(0.0), uptime))
    }

    async fn health_check(&self) -> Result<(), StorageError> {
        sqlx::query("SELECT 1").execute(self.pool.inner()).await?;
        Ok(())
    }
}
