//! Core data types for the storage layer.
//!
//! - [`Sample`]: one resolved probe, latency or loss
//! - [`TimeRange`]: inclusive epoch-millisecond window used by queries

use serde::Serialize;

use crate::monitor::PeerId;

/// Response time recorded when no reply arrived within the peer timeout.
pub const LOSS_RESPONSE_TIME_MS: i64 = -1;

/// One latency measurement or recorded loss for a peer.
///
/// Serialized as `{"ResponseTime": .., "Time": ..}`, the record shape web
/// clients consume for both the historical series and the live stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Sample {
    /// Peer this sample belongs to.
    #[serde(skip_serializing)]
    pub peer_id: PeerId,
    /// Round-trip time in milliseconds, or [`LOSS_RESPONSE_TIME_MS`].
    pub response_time: i64,
    /// Resolution time (reply receipt or timeout detection), Unix millis.
    #[serde(rename = "Time")]
    pub timestamp_ms: i64,
}

impl Sample {
    /// Create a sample.
    pub fn new(peer_id: PeerId, timestamp_ms: i64, response_time: i64) -> Self {
        Self {
            peer_id,
            response_time,
            timestamp_ms,
        }
    }

    /// Create a loss sample.
    pub fn loss(peer_id: PeerId, timestamp_ms: i64) -> Self {
        Self::new(peer_id, timestamp_ms, LOSS_RESPONSE_TIME_MS)
    }

    /// Whether this sample records a lost probe.
    pub fn is_loss(&self) -> bool {
        self.response_time == LOSS_RESPONSE_TIME_MS
    }
}

/// Inclusive time window in Unix milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: i64,
    pub stop: i64,
}

impl TimeRange {
    /// Create a range, swapping the bounds if they are reversed.
    pub fn new(start: i64, stop: i64) -> Self {
        if start > stop {
            Self {
                start: stop,
                stop: start,
            }
        } else {
            Self { start, stop }
        }
    }
}
