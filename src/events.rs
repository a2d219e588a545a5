//! Relay-wide observable events.
//!
//! Every named event the relay emits fans out on one broadcast channel.
//! Observers subscribe and must not block: slow subscribers lag and drop,
//! they never stall the emitting handler.

use crate::xplatform::XPlatformId;
use std::net::SocketAddr;
use tokio::sync::broadcast;
use uuid::Uuid;

const EVENT_CHANNEL_CAPACITY: usize = 4096;

#[derive(Debug, Clone)]
pub enum RelayEvent {
    ServerStarted {
        bind_address: SocketAddr,
    },
    ServerStopped,
    /// Fired once per incoming connection after the authorization check,
    /// before the service sees the peer.
    AuthorizationResult {
        endpoint: SocketAddr,
        authorized: bool,
    },
    ServicePeerConnected {
        service: &'static str,
        peer_id: Uuid,
        endpoint: SocketAddr,
    },
    ServicePeerDisconnected {
        service: &'static str,
        peer_id: Uuid,
        endpoint: SocketAddr,
    },
    ServicePeerAuthenticated {
        service: &'static str,
        peer_id: Uuid,
        user_id: XPlatformId,
    },
    ServicePacketSent {
        service: &'static str,
        peer_id: Uuid,
        message_count: usize,
    },
    ServicePacketReceived {
        service: &'static str,
        peer_id: Uuid,
        message_count: usize,
    },
    GameServerRegistered {
        server_id: u64,
    },
    GameServerUnregistered {
        server_id: u64,
    },
    GameServerRegistrationFailure {
        server_id: u64,
        endpoint: SocketAddr,
        reason: String,
    },
}

pub type EventSender = broadcast::Sender<RelayEvent>;

pub fn event_channel() -> (EventSender, broadcast::Receiver<RelayEvent>) {
    broadcast::channel(EVENT_CHANNEL_CAPACITY)
}

/// Emits an event, ignoring the no-subscribers case.
pub fn emit(sender: &EventSender, event: RelayEvent) {
    let _ = sender.send(event);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_reach_subscribers() {
        let (tx, mut rx) = event_channel();
        emit(&tx, RelayEvent::GameServerRegistered { server_id: 42 });

        match rx.recv().await.unwrap() {
            RelayEvent::GameServerRegistered { server_id } => assert_eq!(server_id, 42),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_emit_without_subscribers_is_fine() {
        let (tx, rx) = event_channel();
        drop(rx);
        emit(&tx, RelayEvent::ServerStopped);
    }
}
