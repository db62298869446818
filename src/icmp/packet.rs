//! Echo request / echo reply wire codec.
//!
//! Both families share the same 8-byte layout:
//! `type | code | checksum(2) | identifier(2) | sequence(2)`.
//! ICMPv4 checksums are computed here; for ICMPv6 the kernel fills the
//! checksum on raw sockets since it covers the IPv6 pseudo-header.

use pnet::packet::Packet;
use pnet::packet::icmp::echo_reply::EchoReplyPacket;
use pnet::packet::icmp::echo_request::MutableEchoRequestPacket;
use pnet::packet::icmp::{IcmpCode, IcmpPacket, IcmpTypes, checksum};
use pnet::packet::icmpv6::{Icmpv6Code, Icmpv6Packet, Icmpv6Types, MutableIcmpv6Packet};
use strum_macros::{AsRefStr, Display};

use crate::icmp::TransportError;

/// Length of an echo message without payload.
pub const ECHO_HEADER_LEN: usize = 8;

/// IP family of a socket or target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum Family {
    #[strum(serialize = "ipv4")]
    V4,
    #[strum(serialize = "ipv6")]
    V6,
}

impl Family {
    /// Family of an address.
    pub fn of(addr: &std::net::IpAddr) -> Self {
        match addr {
            std::net::IpAddr::V4(_) => Self::V4,
            std::net::IpAddr::V6(_) => Self::V6,
        }
    }
}

/// Identifier and sequence carried by a decoded echo reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EchoReply {
    pub identifier: u16,
    pub sequence: u16,
}

/// Serialize an echo request for `family`.
pub fn encode_echo_request(
    family: Family,
    identifier: u16,
    sequence: u16,
) -> Result<Vec<u8>, TransportError> {
    let mut buf = vec![0u8; ECHO_HEADER_LEN];
    match family {
        Family::V4 => {
            let mut pkt =
                MutableEchoRequestPacket::new(&mut buf).ok_or(TransportError::Encode(family))?;
            pkt.set_icmp_type(IcmpTypes::EchoRequest);
            pkt.set_icmp_code(IcmpCode::new(0));
            pkt.set_identifier(identifier);
            pkt.set_sequence_number(sequence);
            let sum = IcmpPacket::new(pkt.packet())
                .map(|p| checksum(&p))
                .ok_or(TransportError::Encode(family))?;
            pkt.set_checksum(sum);
        }
        Family::V6 => {
            let mut pkt =
                MutableIcmpv6Packet::new(&mut buf).ok_or(TransportError::Encode(family))?;
            pkt.set_icmpv6_type(Icmpv6Types::EchoRequest);
            pkt.set_icmpv6_code(Icmpv6Code::new(0));
            let [id_hi, id_lo] = identifier.to_be_bytes();
            let [seq_hi, seq_lo] = sequence.to_be_bytes();
            pkt.set_payload(&[id_hi, id_lo, seq_hi, seq_lo]);
        }
    }
    Ok(buf)
}

/// Parse an ICMP message of `family`, returning `None` for anything that is
/// not a well-formed echo reply.
pub fn decode_echo_reply(family: Family, bytes: &[u8]) -> Option<EchoReply> {
    match family {
        Family::V4 => {
            let icmp = IcmpPacket::new(bytes)?;
            if icmp.get_icmp_type() != IcmpTypes::EchoReply {
                return None;
            }
            let reply = EchoReplyPacket::new(bytes)?;
            Some(EchoReply {
                identifier: reply.get_identifier(),
                sequence: reply.get_sequence_number(),
            })
        }
        Family::V6 => {
            let icmp = Icmpv6Packet::new(bytes)?;
            if icmp.get_icmpv6_type() != Icmpv6Types::EchoReply {
                return None;
            }
            match icmp.payload() {
                [id_hi, id_lo, seq_hi, seq_lo, ..] => Some(EchoReply {
                    identifier: u16::from_be_bytes([*id_hi, *id_lo]),
                    sequence: u16::from_be_bytes([*seq_hi, *seq_lo]),
                }),
                _ => None,
            }
        }
    }
}
