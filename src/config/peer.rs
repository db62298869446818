//! Peer entries as written in the configuration file.

use std::net::IpAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::monitor::{Peer, PeerId};

use super::validation::ConfigError;

/// Lower bound for probe intervals and timeouts.
pub const MIN_PROBE_PERIOD: Duration = Duration::from_millis(10);

/// Reflected form of the polynomial used for derived peer ids.
const PEER_ID_POLYNOMIAL: u32 = 0xD582_8281;

/// One `peers:` list entry: either a bare address or a full mapping.
///
/// ```yaml
/// peers:
///   - 192.0.2.1
///   - address: 2001:db8::1
///     name: backbone
///     interval: 500ms
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PeerEntry {
    Address(String),
    Detailed(PeerConfig),
}

/// Full peer mapping. Unset fields fall back to the monitor defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConfig {
    /// IPv4 or IPv6 literal.
    pub address: String,

    /// Display name (default: the address).
    #[serde(default)]
    pub name: Option<String>,

    /// Explicit id (default: derived from the address).
    #[serde(default)]
    pub id: Option<PeerId>,

    #[serde(default, with = "humantime_serde")]
    pub interval: Option<Duration>,

    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
}

impl PeerConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: None,
            id: None,
            interval: None,
            timeout: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_id(mut self, id: PeerId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl From<PeerEntry> for PeerConfig {
    fn from(entry: PeerEntry) -> Self {
        match entry {
            PeerEntry::Address(address) => PeerConfig::new(address),
            PeerEntry::Detailed(config) => config,
        }
    }
}

impl PeerEntry {
    /// Resolve into a [`Peer`], filling unset fields from the defaults and
    /// clamping periods to [`MIN_PROBE_PERIOD`].
    pub fn resolve(
        &self,
        default_interval: Duration,
        default_timeout: Duration,
    ) -> Result<Peer, ConfigError> {
        let config = PeerConfig::from(self.clone());
        let address_text = config.address.trim();
        let address: IpAddr = address_text.parse().map_err(|_| {
            ConfigError::ValidationError(format!("invalid peer address: '{}'", config.address))
        })?;

        let name = config
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| address_text.to_string());
        let id = config.id.unwrap_or_else(|| derive_peer_id(address_text));
        let interval = clamp_period(&name, "interval", config.interval.unwrap_or(default_interval));
        let timeout = clamp_period(&name, "timeout", config.timeout.unwrap_or(default_timeout));

        Ok(Peer {
            id,
            name,
            address,
            interval,
            timeout,
        })
    }
}

fn clamp_period(peer: &str, field: &str, value: Duration) -> Duration {
    if value < MIN_PROBE_PERIOD {
        tracing::warn!(
            peer,
            field,
            configured = ?value,
            minimum = ?MIN_PROBE_PERIOD,
            "Probe period below minimum, clamping"
        );
        MIN_PROBE_PERIOD
    } else {
        value
    }
}

/// Stable id for a peer without an explicit one.
///
/// CRC-32 of the address text with the reflected `0xD5828281` polynomial,
/// which keeps ids compatible with databases written by earlier deployments.
pub fn derive_peer_id(address: &str) -> PeerId {
    let mut crc: u32 = 0xFFFF_FFFF;
    for byte in address.as_bytes() {
        crc ^= u32::from(*byte);
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ PEER_ID_POLYNOMIAL;
            } else {
                crc >>= 1;
            }
        }
    }
    PeerId::from(!crc)
}
