//! Fan-out primitives shared by every long-lived task.
//!
//! - [`ShutdownBroadcaster`]: one-shot notify-all / await-all rendezvous used
//!   for cooperative shutdown
//! - [`LiveBroadcaster`]: best-effort sample fan-out for streaming consumers

mod live;
mod shutdown;

pub use live::{DEFAULT_LIVE_CAPACITY, LiveBroadcaster, LiveSubscription};
pub use shutdown::{BroadcastError, ShutdownBroadcaster, ShutdownToken};
