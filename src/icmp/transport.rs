//! Raw socket transport built on `pnet::transport`.

use std::net::IpAddr;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use pnet::packet::Packet;
use pnet::packet::icmp::IcmpPacket;
use pnet::packet::icmpv6::Icmpv6Packet;
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::transport::{
    TransportChannelType, TransportProtocol, TransportReceiver, TransportSender,
    icmp_packet_iter, icmpv6_packet_iter, transport_channel,
};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::broadcast::ShutdownToken;
use crate::icmp::packet::{Family, decode_echo_reply, encode_echo_request};
use crate::monitor::{CorrelatorHandle, Reply, now_ms};

/// Kernel buffer size requested for each raw channel.
const CHANNEL_BUFFER_SIZE: usize = 4096;

/// Capacity of the hand-off queue between the reader thread and the async loop.
const HANDOFF_CAPACITY: usize = 256;

/// How long a blocking read waits before re-checking for shutdown.
pub const DEFAULT_RECEIVE_POLL: Duration = Duration::from_millis(200);

/// Transport errors. Non-fatal per probe.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to open {family} raw socket (requires CAP_NET_RAW): {source}")]
    Open {
        family: Family,
        #[source]
        source: std::io::Error,
    },

    #[error("no {0} socket open")]
    FamilyUnavailable(Family),

    #[error("failed to encode {0} echo request")]
    Encode(Family),
}

/// Identifier stamped on every echo request: the process id truncated to
/// 16 bits.
pub fn process_identifier() -> u16 {
    std::process::id() as u16
}

/// Send side of the probe transport.
pub trait ProbeTransport: Send + Sync + 'static {
    /// Send one echo request to `target`.
    fn send(&self, target: IpAddr, sequence: u16) -> Result<(), TransportError>;
}

/// Raw-socket [`ProbeTransport`].
pub struct IcmpTransport {
    identifier: u16,
    v4: Option<Mutex<TransportSender>>,
    v6: Option<Mutex<TransportSender>>,
}

impl std::fmt::Debug for IcmpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IcmpTransport")
            .field("identifier", &self.identifier)
            .field("v4", &self.v4.is_some())
            .field("v6", &self.v6.is_some())
            .finish()
    }
}

impl IcmpTransport {
    /// Open one raw channel per requested family.
    ///
    /// Returns the shared send half and one [`IcmpReceiver`] per family.
    pub fn open(
        families: &[Family],
        identifier: u16,
    ) -> Result<(Self, Vec<IcmpReceiver>), TransportError> {
        let mut transport = Self {
            identifier,
            v4: None,
            v6: None,
        };
        let mut receivers = Vec::with_capacity(families.len());

        for &family in families {
            let opened = match family {
                Family::V4 => transport.v4.is_some(),
                Family::V6 => transport.v6.is_some(),
            };
            if opened {
                continue;
            }

            let protocol = match family {
                Family::V4 => TransportProtocol::Ipv4(IpNextHeaderProtocols::Icmp),
                Family::V6 => TransportProtocol::Ipv6(IpNextHeaderProtocols::Icmpv6),
            };
            let (tx, rx) = transport_channel(
                CHANNEL_BUFFER_SIZE,
                TransportChannelType::Layer4(protocol),
            )
            .map_err(|source| TransportError::Open { family, source })?;

            match family {
                Family::V4 => transport.v4 = Some(Mutex::new(tx)),
                Family::V6 => transport.v6 = Some(Mutex::new(tx)),
            }
            receivers.push(IcmpReceiver {
                family,
                identifier,
                rx,
                poll: DEFAULT_RECEIVE_POLL,
            });
            tracing::info!(family = %family, identifier, "Opened ICMP raw socket");
        }

        Ok((transport, receivers))
    }
}

impl ProbeTransport for IcmpTransport {
    fn send(&self, target: IpAddr, sequence: u16) -> Result<(), TransportError> {
        let family = Family::of(&target);
        let sender = match family {
            Family::V4 => self.v4.as_ref(),
            Family::V6 => self.v6.as_ref(),
        }
        .ok_or(TransportError::FamilyUnavailable(family))?;

        let bytes = encode_echo_request(family, self.identifier, sequence)?;
        let mut sender = sender.lock().unwrap_or_else(PoisonError::into_inner);
        match family {
            Family::V4 => {
                let packet = IcmpPacket::new(&bytes).ok_or(TransportError::Encode(family))?;
                sender.send_to(packet, target)?;
            }
            Family::V6 => {
                let packet = Icmpv6Packet::new(&bytes).ok_or(TransportError::Encode(family))?;
                sender.send_to(packet, target)?;
            }
        }
        Ok(())
    }
}

/// Receive half of one raw channel.
pub struct IcmpReceiver {
    family: Family,
    identifier: u16,
    rx: TransportReceiver,
    poll: Duration,
}

impl std::fmt::Debug for IcmpReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IcmpReceiver")
            .field("family", &self.family)
            .field("identifier", &self.identifier)
            .finish_non_exhaustive()
    }
}

impl IcmpReceiver {
    /// Family this receiver reads.
    pub fn family(&self) -> Family {
        self.family
    }

    /// Set how often the blocking read wakes up to check for shutdown.
    pub fn with_poll_interval(mut self, poll: Duration) -> Self {
        self.poll = poll;
        self
    }

    /// Forward matching echo replies to the correlator until shutdown.
    ///
    /// The blocking read runs on a dedicated thread feeding
    /// [`forward_replies`]; acknowledges on exit.
    pub async fn run(self, correlator: CorrelatorHandle, token: ShutdownToken) {
        let family = self.family;
        let (tx, rx) = mpsc::channel(HANDOFF_CAPACITY);

        let spawned = std::thread::Builder::new()
            .name(format!("icmp-recv-{family}"))
            .spawn(move || self.read_loop(tx));
        if let Err(e) = spawned {
            tracing::error!(family = %family, error = %e, "Failed to spawn receive thread");
            token.acknowledge();
            return;
        }

        forward_replies(family, rx, correlator, token).await;
    }

    fn read_loop(mut self, tx: mpsc::Sender<Reply>) {
        let family = self.family;
        let identifier = self.identifier;
        let poll = self.poll;

        let forward = |bytes: &[u8], source: IpAddr| -> bool {
            let Some(echo) = decode_echo_reply(family, bytes) else {
                return true;
            };
            if echo.identifier != identifier {
                return true;
            }
            let reply = Reply {
                sequence: echo.sequence,
                source,
                received_at_ms: now_ms(),
            };
            tx.blocking_send(reply).is_ok()
        };

        match family {
            Family::V4 => {
                let mut iter = icmp_packet_iter(&mut self.rx);
                loop {
                    match iter.next_with_timeout(poll) {
                        Ok(Some((packet, source))) => {
                            if !forward(packet.packet(), source) {
                                break;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            tracing::warn!(family = %family, error = %e, "ICMP read failed");
                            std::thread::sleep(poll);
                        }
                    }
                    if tx.is_closed() {
                        break;
                    }
                }
            }
            Family::V6 => {
                let mut iter = icmpv6_packet_iter(&mut self.rx);
                loop {
                    match iter.next_with_timeout(poll) {
                        Ok(Some((packet, source))) => {
                            if !forward(packet.packet(), source) {
                                break;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            tracing::warn!(family = %family, error = %e, "ICMP read failed");
                            std::thread::sleep(poll);
                        }
                    }
                    if tx.is_closed() {
                        break;
                    }
                }
            }
        }
    }
}

/// Race the hand-off queue against shutdown, passing each reply to the
/// correlator. Stops on shutdown, when every producer is gone, or when the
/// correlator is, then acknowledges.
///
/// Dropping `replies` on exit stops a reader thread at its next poll.
pub async fn forward_replies(
    family: Family,
    mut replies: mpsc::Receiver<Reply>,
    correlator: CorrelatorHandle,
    mut token: ShutdownToken,
) {
    loop {
        tokio::select! {
            _ = token.notified() => break,
            reply = replies.recv() => match reply {
                Some(reply) => {
                    if correlator.reply(reply).await.is_err() {
                        tracing::debug!(family = %family, "Correlator gone, stopping receiver");
                        break;
                    }
                }
                None => break,
            },
        }
    }

    drop(replies);
    tracing::debug!(family = %family, "ICMP receiver stopped");
    token.acknowledge();
}
