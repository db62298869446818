//! Request/reply correlation and timeout detection.
//!
//! The correlator is the only owner of the pending-request table. Every
//! input reaches it as a [`CorrelatorEvent`] and is handled to completion,
//! including persistence and live publication of the resulting samples,
//! before the next one is looked at.

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{MissedTickBehavior, interval};

use crate::broadcast::{LiveBroadcaster, ShutdownToken};
use crate::monitor::{MonitorError, Peer, PeerId, PendingRequest, Reply, duration_ms, now_ms};
use crate::storage::{Sample, SampleStore};

/// Default period of the timeout sweep.
pub const DEFAULT_TIMEOUT_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Default period of the retention sweep.
pub const DEFAULT_RETENTION_CHECK_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Default retention window (four weeks).
pub const DEFAULT_KEEP_HISTORY_FOR: Duration = Duration::from_secs(672 * 60 * 60);

/// Everything the correlator reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrelatorEvent {
    Request(PendingRequest),
    Reply(Reply),
    TimeoutTick,
    RetentionTick,
    Shutdown,
}

/// Cloneable sender side of the correlator queue.
///
/// Requests and replies share one FIFO queue, so a request enqueued before
/// its probe is sent is always seen before the matching reply.
#[derive(Debug, Clone)]
pub struct CorrelatorHandle {
    tx: mpsc::Sender<CorrelatorEvent>,
}

impl CorrelatorHandle {
    pub(crate) fn new(tx: mpsc::Sender<CorrelatorEvent>) -> Self {
        Self { tx }
    }

    /// Register a request that is about to be sent.
    pub async fn request(&self, request: PendingRequest) -> Result<(), MonitorError> {
        self.send(CorrelatorEvent::Request(request)).await
    }

    /// Hand over a received reply.
    pub async fn reply(&self, reply: Reply) -> Result<(), MonitorError> {
        self.send(CorrelatorEvent::Reply(reply)).await
    }

    async fn send(&self, event: CorrelatorEvent) -> Result<(), MonitorError> {
        self.tx
            .send(event)
            .await
            .map_err(|_| MonitorError::CorrelatorClosed)
    }
}

/// Correlator timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorrelatorSettings {
    pub timeout_check_interval: Duration,
    pub retention_check_interval: Duration,
    pub keep_history_for: Duration,
}

impl Default for CorrelatorSettings {
    fn default() -> Self {
        Self {
            timeout_check_interval: DEFAULT_TIMEOUT_CHECK_INTERVAL,
            retention_check_interval: DEFAULT_RETENTION_CHECK_INTERVAL,
            keep_history_for: DEFAULT_KEEP_HISTORY_FOR,
        }
    }
}

/// Outstanding requests in send order.
#[derive(Debug, Default)]
pub struct PendingTable {
    entries: Vec<PendingRequest>,
}

impl PendingTable {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append a request. Returns `true` if another request with the same
    /// sequence was still outstanding.
    pub fn insert(&mut self, request: PendingRequest) -> bool {
        let collision = self
            .entries
            .iter()
            .any(|p| p.sequence == request.sequence);
        self.entries.push(request);
        collision
    }

    /// Match a reply against the newest request with its sequence and
    /// remove it. Returns the latency sample, or `None` if nothing matched.
    pub fn resolve(&mut self, reply: &Reply) -> Option<Sample> {
        let index = self
            .entries
            .iter()
            .rposition(|p| p.sequence == reply.sequence)?;
        let request = self.entries.remove(index);
        let response_time = (reply.received_at_ms - request.sent_at_ms).max(0);
        Some(Sample::new(
            request.peer_id,
            reply.received_at_ms,
            response_time,
        ))
    }

    /// Remove every request whose age has reached its timeout and return a
    /// loss sample for each, in send order.
    pub fn expire<F>(&mut self, now_ms: i64, timeout_ms: F) -> Vec<Sample>
    where
        F: Fn(PeerId) -> i64,
    {
        let mut lost = Vec::new();
        self.entries.retain(|p| {
            if now_ms - p.sent_at_ms >= timeout_ms(p.peer_id) {
                lost.push(Sample::loss(p.peer_id, now_ms));
                false
            } else {
                true
            }
        });
        lost
    }
}

fn timeouts_max(peers: &[Peer]) -> i64 {
    peers
        .iter()
        .map(|p| duration_ms(p.timeout))
        .max()
        .unwrap_or(1_000)
}

/// Single-task event processor turning requests and replies into samples.
pub struct Correlator {
    pending: PendingTable,
    timeouts: HashMap<PeerId, i64>,
    default_timeout_ms: i64,
    store: Arc<dyn SampleStore>,
    live: LiveBroadcaster,
    settings: CorrelatorSettings,
}

impl std::fmt::Debug for Correlator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Correlator")
            .field("pending", &self.pending.len())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Correlator {
    /// Create a correlator for `peers`.
    pub fn new(peers: &[Peer], store: Arc<dyn SampleStore>, live: LiveBroadcaster) -> Self {
        let timeouts = peers
            .iter()
            .map(|p| (p.id, duration_ms(p.timeout)))
            .collect();
        // Requests for unknown peers expire with the most lenient timeout.
        let default_timeout_ms = timeouts_max(peers);

        Self {
            pending: PendingTable::default(),
            timeouts,
            default_timeout_ms,
            store,
            live,
            settings: CorrelatorSettings::default(),
        }
    }

    /// Override timing.
    pub fn with_settings(mut self, settings: CorrelatorSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Number of outstanding requests.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Process events until shutdown, then acknowledge.
    ///
    /// The retention sweep runs once immediately, then every
    /// `retention_check_interval`.
    pub async fn run(mut self, mut events: mpsc::Receiver<CorrelatorEvent>, mut token: ShutdownToken) {
        let mut timeout_tick = interval(self.settings.timeout_check_interval);
        timeout_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut retention_tick = interval(self.settings.retention_check_interval);
        retention_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::debug!("Correlator started");
        loop {
            let event = tokio::select! {
                biased;
                _ = token.notified() => CorrelatorEvent::Shutdown,
                Some(event) = events.recv() => event,
                _ = timeout_tick.tick() => CorrelatorEvent::TimeoutTick,
                _ = retention_tick.tick() => CorrelatorEvent::RetentionTick,
            };

            if self.handle(event).await.is_break() {
                break;
            }
        }

        tracing::info!(pending = self.pending.len(), "Correlator stopped");
        token.acknowledge();
    }

    /// Apply one event.
    pub async fn handle(&mut self, event: CorrelatorEvent) -> ControlFlow<()> {
        match event {
            CorrelatorEvent::Request(request) => {
                if self.pending.insert(request) {
                    tracing::warn!(
                        sequence = request.sequence,
                        peer_id = request.peer_id,
                        "Sequence number reused while a request is still pending"
                    );
                }
            }
            CorrelatorEvent::Reply(reply) => match self.pending.resolve(&reply) {
                Some(sample) => self.emit(sample).await,
                None => tracing::trace!(
                    sequence = reply.sequence,
                    source = %reply.source,
                    "Discarding unmatched reply"
                ),
            },
            CorrelatorEvent::TimeoutTick => {
                let timeouts = &self.timeouts;
                let default_timeout_ms = self.default_timeout_ms;
                let lost = self.pending.expire(now_ms(), |peer_id| {
                    timeouts.get(&peer_id).copied().unwrap_or(default_timeout_ms)
                });
                for sample in lost {
                    self.emit(sample).await;
                }
            }
            CorrelatorEvent::RetentionTick => self.sweep_history().await,
            CorrelatorEvent::Shutdown => return ControlFlow::Break(()),
        }
        ControlFlow::Continue(())
    }

    async fn emit(&self, sample: Sample) {
        if let Err(e) = self.store.insert(&sample).await {
            tracing::warn!(
                peer_id = sample.peer_id,
                error = %e,
                "Failed to persist sample"
            );
        }
        self.live.publish(sample);
    }

    async fn sweep_history(&self) {
        let cutoff = now_ms() - duration_ms(self.settings.keep_history_for);
        match self.store.delete_older_than(cutoff).await {
            Ok(0) => {}
            Ok(deleted) => tracing::info!(deleted, cutoff, "Removed expired samples"),
            Err(e) => tracing::warn!(error = %e, "Failed to remove expired samples"),
        }
    }
}
