//! ICMP Layer
//!
//! Raw-socket echo transport for IPv4 and IPv6.
//!
//! # Architecture
//!
//! - [`packet`]: echo request encoding and echo reply decoding
//! - [`ProbeTransport`]: send side, shared by every scheduler task
//! - [`IcmpReceiver`]: receive loop per family, feeding the correlator
//!
//! Opening raw sockets requires `CAP_NET_RAW` (or root).

pub mod packet;
mod transport;

pub use packet::{EchoReply, Family, decode_echo_reply, encode_echo_request};
pub use transport::{
    DEFAULT_RECEIVE_POLL, IcmpReceiver, IcmpTransport, ProbeTransport, TransportError,
    forward_replies, process_identifier,
};
