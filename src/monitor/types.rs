//! Measurement engine data types.

use std::net::IpAddr;
use std::time::Duration;

/// Stable peer identifier, also the persisted key of its samples.
pub type PeerId = i64;

/// A monitored host. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub id: PeerId,
    pub name: String,
    pub address: IpAddr,
    /// Time between two probes.
    pub interval: Duration,
    /// Age after which an unanswered probe counts as lost.
    pub timeout: Duration,
}

impl Peer {
    /// Create a peer named after its address.
    pub fn new(id: PeerId, address: IpAddr, interval: Duration, timeout: Duration) -> Self {
        Self {
            id,
            name: address.to_string(),
            address,
            interval,
            timeout,
        }
    }

    /// Set the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// A probe that has been sent and is awaiting its reply or timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingRequest {
    pub sequence: u16,
    pub peer_id: PeerId,
    pub sent_at_ms: i64,
}

/// A decoded echo reply carrying our identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reply {
    pub sequence: u16,
    pub source: IpAddr,
    pub received_at_ms: i64,
}

/// Current wall clock time in Unix milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Duration as whole milliseconds, saturating.
pub fn duration_ms(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
