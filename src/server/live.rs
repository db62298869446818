//! `/livedata` WebSocket sessions.
//!
//! The client selects a peer by sending its id as a 4-byte big-endian
//! binary message; from then on every finalized sample for that peer is
//! pushed as one JSON text message. Sending another id switches peers.

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};

use crate::broadcast::{LiveSubscription, ShutdownToken};
use crate::monitor::PeerId;

/// Decode a peer selection message.
pub fn parse_peer_selection(bytes: &[u8]) -> Option<PeerId> {
    let id: [u8; 4] = bytes.get(..4)?.try_into().ok()?;
    Some(PeerId::from(u32::from_be_bytes(id)))
}

pub(super) async fn session(
    socket: WebSocket,
    mut samples: LiveSubscription,
    mut token: ShutdownToken,
) {
    let (mut sender, mut receiver) = socket.split();
    let mut selected: Option<PeerId> = None;

    tracing::debug!(session = token.id(), "Live session opened");
    loop {
        tokio::select! {
            _ = token.notified() => {
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
            message = receiver.next() => match message {
                Some(Ok(Message::Binary(bytes))) => match parse_peer_selection(&bytes) {
                    Some(peer_id) => {
                        tracing::debug!(session = token.id(), peer_id, "Live session selected peer");
                        selected = Some(peer_id);
                    }
                    None => tracing::debug!(
                        session = token.id(),
                        len = bytes.len(),
                        "Ignoring short peer selection"
                    ),
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(session = token.id(), error = %e, "Live session read failed");
                    break;
                }
            },
            sample = samples.recv() => match sample {
                Some(sample) if Some(sample.peer_id) == selected => {
                    let json = match serde_json::to_string(&sample) {
                        Ok(json) => json,
                        Err(e) => {
                            tracing::warn!(error = %e, "Failed to encode live sample");
                            continue;
                        }
                    };
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Some(_) => {}
                None => break,
            },
        }
    }

    if samples.dropped() > 0 {
        tracing::debug!(
            session = token.id(),
            dropped = samples.dropped(),
            "Live session fell behind"
        );
    }
    tracing::debug!(session = token.id(), "Live session closed");
    token.acknowledge();
}
