//! Shutdown rendezvous: notify every subscriber once, then wait for all of
//! them to acknowledge.

use std::sync::{Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::sync::oneshot;

/// Errors raised by the shutdown broadcaster.
#[derive(Debug, Error)]
pub enum BroadcastError {
    /// The subscriber set is closed once shutdown has been signaled.
    #[error("shutdown already signaled, no new subscribers accepted")]
    AlreadySignaled,
}

struct Subscriber {
    id: u64,
    notify: oneshot::Sender<()>,
    ack: oneshot::Receiver<()>,
}

enum State {
    Open {
        next_id: u64,
        subscribers: Vec<Subscriber>,
    },
    Signaled {
        pending: Vec<(u64, oneshot::Receiver<()>)>,
    },
}

/// Registry of shutdown subscribers with a two-phase protocol.
///
/// [`signal`](Self::signal) notifies every live subscriber exactly once and
/// closes the set; [`wait_for_acknowledgement`](Self::wait_for_acknowledgement)
/// resolves once each of them has called [`ShutdownToken::acknowledge`] or
/// dropped its token.
pub struct ShutdownBroadcaster {
    state: Mutex<State>,
}

impl Default for ShutdownBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ShutdownBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownBroadcaster")
            .field("signaled", &self.is_signaled())
            .finish_non_exhaustive()
    }
}

impl ShutdownBroadcaster {
    /// Create an empty broadcaster.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::Open {
                next_id: 0,
                subscribers: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new subscriber.
    ///
    /// Subscribers whose tokens were already dropped are pruned here so that
    /// short-lived tasks (web sessions) do not accumulate in the registry.
    ///
    /// # Errors
    /// Returns [`BroadcastError::AlreadySignaled`] after [`signal`](Self::signal).
    pub fn subscribe(&self) -> Result<ShutdownToken, BroadcastError> {
        let mut state = self.lock();
        let State::Open {
            next_id,
            subscribers,
        } = &mut *state
        else {
            return Err(BroadcastError::AlreadySignaled);
        };

        subscribers.retain(|s| !s.notify.is_closed());

        let id = *next_id;
        *next_id += 1;

        let (notify_tx, notify_rx) = oneshot::channel();
        let (ack_tx, ack_rx) = oneshot::channel();
        subscribers.push(Subscriber {
            id,
            notify: notify_tx,
            ack: ack_rx,
        });

        Ok(ShutdownToken {
            id,
            notify: notify_rx,
            ack: Some(ack_tx),
            notified: false,
        })
    }

    /// Number of subscribers that have not yet left.
    pub fn subscriber_count(&self) -> usize {
        match &*self.lock() {
            State::Open { subscribers, .. } => {
                subscribers.iter().filter(|s| !s.notify.is_closed()).count()
            }
            State::Signaled { pending } => pending.len(),
        }
    }

    /// Whether [`signal`](Self::signal) has been called.
    pub fn is_signaled(&self) -> bool {
        matches!(&*self.lock(), State::Signaled { .. })
    }

    /// Notify every current subscriber and close the subscriber set.
    ///
    /// Returns the number of subscribers notified. A second call is a no-op
    /// and returns 0.
    pub fn signal(&self) -> usize {
        let mut state = self.lock();
        let subscribers = match &mut *state {
            State::Open { subscribers, .. } => std::mem::take(subscribers),
            State::Signaled { .. } => {
                tracing::debug!("Shutdown already signaled");
                return 0;
            }
        };

        let mut pending = Vec::with_capacity(subscribers.len());
        for sub in subscribers {
            // A closed notify channel means the token is gone; its ack
            // receiver resolves on its own.
            if sub.notify.send(()).is_ok() {
                pending.push((sub.id, sub.ack));
            }
        }

        let notified = pending.len();
        *state = State::Signaled { pending };
        tracing::info!(subscribers = notified, "Shutdown signaled");
        notified
    }

    /// Wait until every subscriber notified by [`signal`](Self::signal) has
    /// acknowledged.
    ///
    /// Returns immediately when called before `signal` or a second time.
    pub async fn wait_for_acknowledgement(&self) {
        let pending = match &mut *self.lock() {
            State::Signaled { pending } => std::mem::take(pending),
            State::Open { .. } => {
                tracing::warn!("wait_for_acknowledgement called before signal");
                return;
            }
        };

        let total = pending.len();
        for (id, ack) in pending {
            if ack.await.is_err() {
                tracing::debug!(subscriber = id, "Subscriber left without acknowledging");
            }
        }
        tracing::info!(subscribers = total, "All subscribers acknowledged shutdown");
    }
}

/// Handle held by one long-lived task.
///
/// Await [`notified`](Self::notified) as one arm of the task's event loop,
/// clean up, then call [`acknowledge`](Self::acknowledge).
#[derive(Debug)]
pub struct ShutdownToken {
    id: u64,
    notify: oneshot::Receiver<()>,
    ack: Option<oneshot::Sender<()>>,
    notified: bool,
}

impl ShutdownToken {
    /// Subscriber id, unique per broadcaster.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Resolve once shutdown has been signaled.
    ///
    /// Cancel safe, so it can sit in a `tokio::select!` loop. A broadcaster
    /// dropped without signaling also counts as a notification.
    pub async fn notified(&mut self) {
        if self.notified {
            return;
        }
        let _ = (&mut self.notify).await;
        self.notified = true;
    }

    /// Confirm that this task has finished its cleanup.
    pub fn acknowledge(mut self) {
        if let Some(ack) = self.ack.take() {
            let _ = ack.send(());
        }
    }
}
