//! Configuration module for pingmon.
//!
//! Provides YAML-based configuration loading and validation for:
//! - Server settings (port, bind address, static assets)
//! - Database settings (SQLite URL)
//! - Monitor defaults (interval, timeout, retention)
//! - The peer list

mod app;
mod peer;
mod validation;

pub use app::{AppConfig, DatabaseConfig, MonitorConfig, ServerConfig};
pub use peer::{MIN_PROBE_PERIOD, PeerConfig, PeerEntry, derive_peer_id};
pub use validation::{ConfigError, expand_env_vars};

// Re-export constants
pub use app::{DEFAULT_DATABASE_DSN, DEFAULT_INTERVAL, DEFAULT_PORT, DEFAULT_TIMEOUT};
