//! Measurement Engine
//!
//! Periodic echo probes, reply correlation and timeout detection.
//!
//! # Architecture
//!
//! - [`Scheduler`]: one task per peer, allocates a sequence, registers the
//!   request with the correlator, sends the probe
//! - [`Correlator`]: single task owning the pending table; emits a [`Sample`]
//!   per resolved probe to the store and the live broadcaster
//! - [`IcmpReceiver`]: one task per address family, feeds replies back
//!
//! [`Monitor`] wires these together and ties every task to the shutdown
//! broadcaster.
//!
//! [`Sample`]: crate::storage::Sample

mod correlator;
mod scheduler;
mod sequence;
mod types;

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::broadcast::{BroadcastError, LiveBroadcaster, ShutdownBroadcaster};
use crate::icmp::{IcmpReceiver, ProbeTransport, TransportError};
use crate::storage::SampleStore;

pub use correlator::{
    Correlator, CorrelatorEvent, CorrelatorHandle, CorrelatorSettings,
    DEFAULT_KEEP_HISTORY_FOR, DEFAULT_RETENTION_CHECK_INTERVAL, DEFAULT_TIMEOUT_CHECK_INTERVAL,
    PendingTable,
};
pub use scheduler::Scheduler;
pub use sequence::SequenceAllocator;
pub use types::{Peer, PeerId, PendingRequest, Reply, duration_ms, now_ms};

/// Default depth of the correlator queue.
pub const DEFAULT_EVENT_BUFFER: usize = 1024;

/// Measurement engine errors.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("shutdown error: {0}")]
    Broadcast(#[from] BroadcastError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("correlator is no longer running")]
    CorrelatorClosed,

    #[error("no peers configured")]
    NoPeers,
}

/// Builder for the running measurement engine.
pub struct Monitor {
    peers: Vec<Peer>,
    store: Arc<dyn SampleStore>,
    live: LiveBroadcaster,
    shutdown: Arc<ShutdownBroadcaster>,
    settings: CorrelatorSettings,
    event_buffer: usize,
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("peers", &self.peers.len())
            .field("settings", &self.settings)
            .field("event_buffer", &self.event_buffer)
            .finish_non_exhaustive()
    }
}

impl Monitor {
    pub fn new(
        peers: Vec<Peer>,
        store: Arc<dyn SampleStore>,
        live: LiveBroadcaster,
        shutdown: Arc<ShutdownBroadcaster>,
    ) -> Self {
        Self {
            peers,
            store,
            live,
            shutdown,
            settings: CorrelatorSettings::default(),
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }

    /// Set correlator timing.
    pub fn with_settings(mut self, settings: CorrelatorSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Set the correlator queue depth.
    pub fn with_event_buffer(mut self, event_buffer: usize) -> Self {
        self.event_buffer = event_buffer.max(1);
        self
    }

    /// Spawn the correlator, one scheduler per peer and one task per
    /// receiver. Every task holds a shutdown token.
    pub fn start(
        self,
        transport: Arc<dyn ProbeTransport>,
        receivers: Vec<IcmpReceiver>,
    ) -> Result<MonitorTasks, MonitorError> {
        if self.peers.is_empty() {
            return Err(MonitorError::NoPeers);
        }

        let (tx, rx) = mpsc::channel(self.event_buffer);
        let handle = CorrelatorHandle::new(tx);
        let mut tasks = Vec::with_capacity(self.peers.len() + receivers.len() + 1);

        let correlator = Correlator::new(&self.peers, self.store, self.live)
            .with_settings(self.settings);
        let token = self.shutdown.subscribe()?;
        tasks.push(tokio::spawn(correlator.run(rx, token)));

        for receiver in receivers {
            let token = self.shutdown.subscribe()?;
            tasks.push(tokio::spawn(receiver.run(handle.clone(), token)));
        }

        let sequences = Arc::new(SequenceAllocator::new());
        for peer in self.peers {
            tracing::info!(
                peer = %peer.name,
                id = peer.id,
                address = %peer.address,
                interval = %humantime::format_duration(peer.interval),
                timeout = %humantime::format_duration(peer.timeout),
                "Monitoring peer"
            );
            let scheduler = Scheduler::new(peer, sequences.clone(), transport.clone(), handle.clone());
            let token = self.shutdown.subscribe()?;
            tasks.push(tokio::spawn(scheduler.run(token)));
        }

        Ok(MonitorTasks { handle, tasks })
    }
}

/// Handles to the spawned engine tasks.
#[derive(Debug)]
pub struct MonitorTasks {
    handle: CorrelatorHandle,
    tasks: Vec<JoinHandle<()>>,
}

impl MonitorTasks {
    /// Sender into the correlator, for additional reply sources.
    pub fn correlator(&self) -> CorrelatorHandle {
        self.handle.clone()
    }

    /// Number of spawned tasks.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Wait for every task to finish. Tasks exit after shutdown is signaled.
    pub async fn join(self) {
        drop(self.handle);
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Monitor task failed");
            }
        }
    }
}
