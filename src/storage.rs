//! Storage Layer
//!
//! SQLite persistence for probe samples:
//! - **Writes**: appended by the correlator, one row per resolved probe
//! - **Reads**: range queries and aggregates for the time-series service
//! - **Retention**: age-based deletes driven by the correlator
//!
//! # Components
//!
//! - [`SampleStore`]: persistence contract, implemented by [`SqliteSampleStore`]
//! - [`Sample`] / [`TimeRange`]: stored record and query window
//! - [`StorageBuilder`] / [`StorageHandles`]: Initialization and lifecycle management

mod builder;
pub mod db;
mod error;
mod sample_store;
mod schema;
mod types;

pub use builder::{StorageBuilder, StorageHandles};
pub use error::StorageError;
pub use sample_store::{SampleStore, SqliteSampleStore};
pub use types::{LOSS_RESPONSE_TIME_MS, Sample, TimeRange};
