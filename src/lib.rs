//! pingmon - ICMP reachability monitor
//!
//! Sends periodic echo requests to a set of peers, correlates replies with
//! their requests, records round-trip times (or losses) in SQLite and serves
//! the history and a live stream over HTTP.
//!
//! # Architecture
//!
//! - **Broadcast**: shutdown rendezvous and live sample fan-out
//! - **ICMP**: raw-socket echo transport for IPv4 and IPv6
//! - **Monitor**: per-peer schedulers and the request/reply correlator
//! - **Storage**: SQLite persistence of samples
//! - **Series**: gap filling and downsampling for presentation
//! - **Server**: JSON API, WebSocket live data, static assets
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use pingmon::broadcast::{LiveBroadcaster, ShutdownBroadcaster};
//! use pingmon::config::AppConfig;
//! use pingmon::icmp::{Family, IcmpTransport, process_identifier};
//! use pingmon::monitor::Monitor;
//! use pingmon::storage::StorageBuilder;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::from_yaml("peers:\n  - 192.0.2.1\n")?;
//! let storage = StorageBuilder::new("sqlite::memory:").build().await?;
//! let shutdown = Arc::new(ShutdownBroadcaster::new());
//! let (transport, receivers) = IcmpTransport::open(&[Family::V4], process_identifier())?;
//!
//! let tasks = Monitor::new(
//!     config.peers()?,
//!     storage.samples.clone(),
//!     LiveBroadcaster::default(),
//!     shutdown.clone(),
//! )
//! .start(Arc::new(transport), receivers)?;
//!
//! shutdown.signal();
//! shutdown.wait_for_acknowledgement().await;
//! tasks.join().await;
//! # Ok(())
//! # }
//! ```

pub mod broadcast;
pub mod config;
pub mod icmp;
pub mod monitor;
pub mod series;
pub mod server;
pub mod storage;

pub use broadcast::{LiveBroadcaster, ShutdownBroadcaster};
pub use config::AppConfig;
pub use monitor::{Monitor, Peer, PeerId};
pub use series::TimeSeriesService;
pub use storage::{Sample, StorageBuilder};
