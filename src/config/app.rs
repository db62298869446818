//! Application configuration structures.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::broadcast::DEFAULT_LIVE_CAPACITY;
use crate::monitor::{
    CorrelatorSettings, DEFAULT_EVENT_BUFFER, DEFAULT_KEEP_HISTORY_FOR,
    DEFAULT_RETENTION_CHECK_INTERVAL, DEFAULT_TIMEOUT_CHECK_INTERVAL, Peer,
};

use super::peer::PeerEntry;
use super::validation::{ConfigError, expand_env_vars};

// =============================================================================
// Constants
// =============================================================================

/// Default probe interval (1 second).
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

/// Default probe timeout (1 second).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// Default server port.
pub const DEFAULT_PORT: u16 = 8000;

/// Default database URL.
pub const DEFAULT_DATABASE_DSN: &str = "sqlite:pingmon.db?mode=rwc";

fn default_interval() -> Duration {
    DEFAULT_INTERVAL
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

fn default_keep_history_for() -> Duration {
    DEFAULT_KEEP_HISTORY_FOR
}

fn default_timeout_check_interval() -> Duration {
    DEFAULT_TIMEOUT_CHECK_INTERVAL
}

fn default_retention_check_interval() -> Duration {
    DEFAULT_RETENTION_CHECK_INTERVAL
}

fn default_live_buffer() -> usize {
    DEFAULT_LIVE_CAPACITY
}

fn default_event_buffer() -> usize {
    DEFAULT_EVENT_BUFFER
}

// =============================================================================
// Server Configuration
// =============================================================================

/// Web server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server bind address (default: "0.0.0.0").
    pub bind: String,

    /// Server port (default: 8000).
    pub port: u16,

    /// Directory of static web assets served at `/` (default: none).
    pub static_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            static_dir: None,
        }
    }
}

// =============================================================================
// Database Configuration
// =============================================================================

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite URL. `${VAR}` and `${VAR:-default}` are expanded.
    pub dsn: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            dsn: DEFAULT_DATABASE_DSN.to_string(),
        }
    }
}

// =============================================================================
// Monitor Configuration
// =============================================================================

/// Measurement defaults and housekeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Probe interval for peers without their own (default: 1s).
    #[serde(default = "default_interval", with = "humantime_serde")]
    pub interval: Duration,

    /// Probe timeout for peers without their own (default: 1s).
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// Samples older than this are deleted (default: 672h).
    #[serde(default = "default_keep_history_for", with = "humantime_serde")]
    pub keep_history_for: Duration,

    /// Period of the timeout sweep (default: 1s).
    #[serde(default = "default_timeout_check_interval", with = "humantime_serde")]
    pub timeout_check_interval: Duration,

    /// Period of the retention sweep (default: 1h).
    #[serde(default = "default_retention_check_interval", with = "humantime_serde")]
    pub retention_check_interval: Duration,

    /// Samples buffered per live subscriber, rounded up to a power of two
    /// (default: 128).
    #[serde(default = "default_live_buffer")]
    pub live_buffer: usize,

    /// Depth of the correlator queue (default: 1024).
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
            keep_history_for: DEFAULT_KEEP_HISTORY_FOR,
            timeout_check_interval: DEFAULT_TIMEOUT_CHECK_INTERVAL,
            retention_check_interval: DEFAULT_RETENTION_CHECK_INTERVAL,
            live_buffer: DEFAULT_LIVE_CAPACITY,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

impl MonitorConfig {
    /// Correlator timing derived from this section.
    pub fn correlator_settings(&self) -> CorrelatorSettings {
        CorrelatorSettings {
            timeout_check_interval: self.timeout_check_interval,
            retention_check_interval: self.retention_check_interval,
            keep_history_for: self.keep_history_for,
        }
    }
}

// =============================================================================
// Application Configuration
// =============================================================================

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Web server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Measurement defaults.
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Hosts to probe.
    #[serde(default)]
    pub peers: Vec<PeerEntry>,
}

impl AppConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from YAML text.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_yaml::from_str(content)?;
        config.database.dsn = expand_env_vars(&config.database.dsn);
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` if any field is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Validate server bind address
        self.server.bind.parse::<IpAddr>().map_err(|_| {
            ConfigError::ValidationError(format!(
                "invalid server bind address: '{}'",
                self.server.bind
            ))
        })?;

        // Validate server port
        if self.server.port == 0 {
            return Err(ConfigError::ValidationError(
                "server port must be non-zero".to_string(),
            ));
        }

        if self.database.dsn.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "database dsn must not be empty".to_string(),
            ));
        }

        for (name, value) in [
            ("keep_history_for", self.monitor.keep_history_for),
            ("timeout_check_interval", self.monitor.timeout_check_interval),
            ("retention_check_interval", self.monitor.retention_check_interval),
        ] {
            if value.is_zero() {
                return Err(ConfigError::ValidationError(format!(
                    "monitor {name} must be positive"
                )));
            }
        }

        if self.monitor.live_buffer == 0 || self.monitor.event_buffer == 0 {
            return Err(ConfigError::ValidationError(
                "monitor live_buffer and event_buffer must be positive".to_string(),
            ));
        }

        // Peers resolve, and ids are unique
        self.peers()?;

        Ok(())
    }

    /// Normalized peer list.
    ///
    /// # Errors
    /// Fails when no peers are configured, an address does not parse, or two
    /// peers share an id.
    pub fn peers(&self) -> Result<Vec<Peer>, ConfigError> {
        if self.peers.is_empty() {
            return Err(ConfigError::ValidationError(
                "at least one peer must be configured".to_string(),
            ));
        }

        let mut seen: HashMap<i64, String> = HashMap::with_capacity(self.peers.len());
        let mut peers = Vec::with_capacity(self.peers.len());
        for entry in &self.peers {
            let peer = entry.resolve(self.monitor.interval, self.monitor.timeout)?;
            if let Some(other) = seen.insert(peer.id, peer.name.clone()) {
                return Err(ConfigError::ValidationError(format!(
                    "peers '{}' and '{}' share id {}",
                    other, peer.name, peer.id
                )));
            }
            peers.push(peer);
        }
        Ok(peers)
    }

    /// Socket address the web server listens on.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self.server.bind.parse().map_err(|_| {
            ConfigError::ValidationError(format!(
                "invalid server bind address: '{}'",
                self.server.bind
            ))
        })?;
        Ok(SocketAddr::new(ip, self.server.port))
    }
}
