//! Per-peer probe scheduling.

use std::ops::ControlFlow;
use std::sync::Arc;

use tokio::time::{MissedTickBehavior, interval};

use crate::broadcast::ShutdownToken;
use crate::icmp::ProbeTransport;
use crate::monitor::{CorrelatorHandle, Peer, PendingRequest, SequenceAllocator, now_ms};

/// Sends one probe per interval to a single peer.
pub struct Scheduler {
    peer: Peer,
    sequences: Arc<SequenceAllocator>,
    transport: Arc<dyn ProbeTransport>,
    correlator: CorrelatorHandle,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    pub fn new(
        peer: Peer,
        sequences: Arc<SequenceAllocator>,
        transport: Arc<dyn ProbeTransport>,
        correlator: CorrelatorHandle,
    ) -> Self {
        Self {
            peer,
            sequences,
            transport,
            correlator,
        }
    }

    /// Probe immediately, then every interval, until shutdown.
    pub async fn run(self, mut token: ShutdownToken) {
        let mut ticker = interval(self.peer.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::debug!(
            peer = %self.peer.name,
            address = %self.peer.address,
            interval = ?self.peer.interval,
            "Scheduler started"
        );

        loop {
            tokio::select! {
                biased;
                _ = token.notified() => break,
                _ = ticker.tick() => {
                    if self.probe().await.is_break() {
                        break;
                    }
                }
            }
        }

        tracing::debug!(peer = %self.peer.name, "Scheduler stopped");
        token.acknowledge();
    }

    async fn probe(&self) -> ControlFlow<()> {
        let sequence = self.sequences.next();
        let request = PendingRequest {
            sequence,
            peer_id: self.peer.id,
            sent_at_ms: now_ms(),
        };

        // Register before sending so the reply can never overtake it.
        if self.correlator.request(request).await.is_err() {
            tracing::debug!(peer = %self.peer.name, "Correlator gone, stopping scheduler");
            return ControlFlow::Break(());
        }

        if let Err(e) = self.transport.send(self.peer.address, sequence) {
            tracing::warn!(
                peer = %self.peer.name,
                address = %self.peer.address,
                sequence,
                error = %e,
                "Failed to send echo request"
            );
        }
        ControlFlow::Continue(())
    }
}
