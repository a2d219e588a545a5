//! ServerDB service: the endpoint dedicated game servers connect to.
//!
//! Each peer registers exactly one game server; the registration lives in
//! the shared [`GameServerRegistry`] and is removed when the peer
//! disconnects, before the disconnect event fires. Session lifecycle and
//! roster messages from the game server update the registry record under its
//! own lock.

use super::Service;
use crate::error::ServiceError;
use crate::events::{emit, EventSender, RelayEvent};
use crate::peer::{Peer, SessionSlot};
use crate::protocol::Message;
use crate::registry::{GameServerRegistry, RegisteredGameServer, RegistrationRequest};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

pub const SERVERDB_SERVICE: &str = "serverdb";

pub struct ServerDbService {
    peers: DashMap<Uuid, Arc<Peer>>,
    events: EventSender,
    registry: Arc<GameServerRegistry>,
}

impl ServerDbService {
    pub fn new(registry: Arc<GameServerRegistry>, events: EventSender) -> Self {
        Self {
            peers: DashMap::new(),
            events,
            registry,
        }
    }

    pub fn registry(&self) -> &Arc<GameServerRegistry> {
        &self.registry
    }

    /// The record owned by this peer, if it has completed registration.
    async fn record_of(&self, peer: &Arc<Peer>) -> Option<Arc<RegisteredGameServer>> {
        match peer.session_slot(self.name()) {
            Some(SessionSlot::GameServer { server_id }) => self.registry.get(server_id).await,
            _ => None,
        }
    }

    async fn handle_registration(&self, peer: &Arc<Peer>, req: RegistrationRequest) {
        let server_id = req.server_id;
        match self.registry.register(peer, &req).await {
            Ok(record) => {
                peer.set_session_slot(self.name(), SessionSlot::GameServer { server_id });
                self.send(
                    peer,
                    &[Message::RegistrationSuccess {
                        server_id,
                        external_address: record.external_address,
                    }],
                );
            }
            Err(err) => {
                warn!(
                    "Refusing game server {server_id} from {}: {err}",
                    peer.address()
                );
                emit(
                    &self.events,
                    RelayEvent::GameServerRegistrationFailure {
                        server_id,
                        endpoint: peer.address(),
                        reason: err.to_string(),
                    },
                );
                self.send(
                    peer,
                    &[Message::RegistrationFailure {
                        reason: err.to_string(),
                    }],
                );
                peer.close();
            }
        }
    }
}

#[async_trait]
impl Service for ServerDbService {
    fn name(&self) -> &'static str {
        SERVERDB_SERVICE
    }

    fn path(&self) -> &'static str {
        "/serverdb"
    }

    fn peers(&self) -> &DashMap<Uuid, Arc<Peer>> {
        &self.peers
    }

    fn events(&self) -> &EventSender {
        &self.events
    }

    async fn handle_message(
        &self,
        peer: &Arc<Peer>,
        message: Message,
    ) -> Result<(), ServiceError> {
        match message {
            Message::RegisterGameServer {
                server_id,
                internal_address,
                external_address,
                port,
                region_symbol,
                version_lock,
            } => {
                self.handle_registration(
                    peer,
                    RegistrationRequest {
                        server_id,
                        internal_address,
                        external_address,
                        port,
                        region_symbol,
                        version_lock,
                    },
                )
                .await;
            }

            Message::LobbySessionStartedv4 { session_guid } => {
                if let Some(record) = self.record_of(peer).await {
                    if !record.confirm_session_started(&session_guid) {
                        warn!(
                            "Game server {} confirmed a session it does not hold: {session_guid}",
                            record.server_id
                        );
                    }
                }
            }

            Message::LobbySessionEnded { session_guid } => {
                if let Some(record) = self.record_of(peer).await {
                    debug!(
                        "Game server {} ended session {session_guid}",
                        record.server_id
                    );
                    record.end_session();
                }
            }

            Message::LobbyPlayerJoined { user_id, .. } => {
                if let Some(record) = self.record_of(peer).await {
                    let count = record.player_joined(user_id);
                    debug!(
                        "Player {user_id} joined server {} ({count} present)",
                        record.server_id
                    );
                }
            }

            Message::LobbyPlayerLeft { user_id, .. } => {
                if let Some(record) = self.record_of(peer).await {
                    let count = record.player_left(&user_id);
                    debug!(
                        "Player {user_id} left server {} ({count} present)",
                        record.server_id
                    );
                }
            }

            Message::GameServerRegistrationUpdate {
                is_public,
                capacity,
            } => {
                if let Some(record) = self.record_of(peer).await {
                    record.set_registration(is_public, capacity);
                }
            }

            other => debug!("ServerDB service ignoring {}", other.type_name()),
        }
        Ok(())
    }

    async fn peer_disconnected_hook(&self, peer: &Arc<Peer>) {
        // Runs before the disconnect event: the registration is gone by the
        // time anything observes the peer's close.
        peer.clear_session_slot(self.name());
        self.registry.unregister_peer(peer.id()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::event_channel;
    use crate::peer::PeerCommand;
    use crate::protocol::{decode_packet, DEFAULT_MAX_MESSAGE_BYTES};
    use crate::registry::{EndpointValidator, SessionPhaseKind};
    use crate::symbols::{Symbol, SymbolCache};
    use crate::xplatform::XPlatformId;
    use std::net::Ipv4Addr;
    use std::time::Duration;
    use tokio::sync::{broadcast, mpsc};

    fn symbols() -> Arc<SymbolCache> {
        let mut cache = SymbolCache::new();
        cache.insert("us-east", Symbol(100));
        Arc::new(cache)
    }

    fn service(validator: Option<EndpointValidator>) -> (ServerDbService, broadcast::Receiver<RelayEvent>) {
        let (events, rx) = event_channel();
        let registry = Arc::new(GameServerRegistry::new(symbols(), validator, events.clone()));
        (ServerDbService::new(registry, events), rx)
    }

    fn register_message(server_id: u64) -> Message {
        Message::RegisterGameServer {
            server_id,
            internal_address: Ipv4Addr::new(10, 0, 0, 5),
            external_address: Ipv4Addr::new(203, 0, 113, 7),
            port: 6792,
            region_symbol: Symbol(100),
            version_lock: Symbol::of("v1.0"),
        }
    }

    fn next_reply(rx: &mut mpsc::UnboundedReceiver<PeerCommand>) -> Message {
        match rx.try_recv().unwrap() {
            PeerCommand::Packet(bytes) => decode_packet(&bytes, DEFAULT_MAX_MESSAGE_BYTES)
                .unwrap()
                .remove(0),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_registration_success_flow() {
        let (service, _events) = service(None);
        let (peer, mut rx) = Peer::new("127.0.0.1:5100".parse().unwrap());

        service.attach_peer(peer.clone()).await;
        service.handle_packet(&peer, vec![register_message(42)]).await;

        assert!(matches!(
            next_reply(&mut rx),
            Message::RegistrationSuccess { server_id: 42, .. }
        ));
        assert!(service.registry.get(42).await.is_some());
        assert_eq!(
            peer.session_slot(SERVERDB_SERVICE),
            Some(SessionSlot::GameServer { server_id: 42 })
        );
    }

    #[tokio::test]
    async fn test_invalid_registration_is_refused_and_closes() {
        let (service, mut events) = service(None);
        let (peer, mut rx) = Peer::new("127.0.0.1:5100".parse().unwrap());

        service.attach_peer(peer.clone()).await;
        service.handle_packet(&peer, vec![register_message(0)]).await;

        assert!(matches!(next_reply(&mut rx), Message::RegistrationFailure { .. }));
        assert!(peer.is_closed());
        assert_eq!(service.registry.len().await, 0);

        // Exactly one registration-failure event fired.
        let mut failures = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, RelayEvent::GameServerRegistrationFailure { .. }) {
                failures += 1;
            }
        }
        assert_eq!(failures, 1);
    }

    #[tokio::test]
    async fn test_probe_timeout_refuses_registration() {
        // Nothing listens on the silent socket's port, so the probe times out.
        let silent = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let silent_port = silent.local_addr().unwrap().port();

        let (service, mut events) = service(Some(EndpointValidator::new(
            Duration::from_millis(200),
        )));
        let (peer, mut rx) = Peer::new("127.0.0.1:5100".parse().unwrap());
        service.attach_peer(peer.clone()).await;

        service
            .handle_packet(
                &peer,
                vec![Message::RegisterGameServer {
                    server_id: 42,
                    internal_address: Ipv4Addr::new(10, 0, 0, 5),
                    external_address: Ipv4Addr::new(127, 0, 0, 1),
                    port: silent_port,
                    region_symbol: Symbol(100),
                    version_lock: Symbol::of("v1.0"),
                }],
            )
            .await;

        assert!(matches!(next_reply(&mut rx), Message::RegistrationFailure { .. }));
        assert!(peer.is_closed());
        assert_eq!(service.registry.len().await, 0);

        let mut failures = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, RelayEvent::GameServerRegistrationFailure { server_id: 42, .. }) {
                failures += 1;
            }
        }
        assert_eq!(failures, 1);
    }

    #[tokio::test]
    async fn test_second_registration_from_same_peer_is_refused() {
        let (service, _events) = service(None);
        let (peer, mut rx) = Peer::new("127.0.0.1:5100".parse().unwrap());

        service.attach_peer(peer.clone()).await;
        service.handle_packet(&peer, vec![register_message(1)]).await;
        assert!(matches!(next_reply(&mut rx), Message::RegistrationSuccess { .. }));

        service.handle_packet(&peer, vec![register_message(2)]).await;
        assert!(matches!(next_reply(&mut rx), Message::RegistrationFailure { .. }));
        assert!(service.registry.get(2).await.is_none());
        // The original registration survives.
        assert!(service.registry.get(1).await.is_some());
    }

    #[tokio::test]
    async fn test_session_lifecycle_messages_drive_the_record() {
        let (service, _events) = service(None);
        let (peer, _rx) = Peer::new("127.0.0.1:5100".parse().unwrap());
        service.attach_peer(peer.clone()).await;
        service.handle_packet(&peer, vec![register_message(42)]).await;

        let record = service.registry.get(42).await.unwrap();
        let guid = Uuid::new_v4();
        assert!(record.try_begin_session(crate::registry::SessionInfo {
            session_guid: guid,
            level_symbol: Symbol::of("arena"),
            game_mode_symbol: Symbol::of("social"),
        }));

        service
            .handle_packet(&peer, vec![Message::LobbySessionStartedv4 { session_guid: guid }])
            .await;
        assert_eq!(record.snapshot().phase, SessionPhaseKind::SessionActive);

        let alice = XPlatformId::new(7, 1);
        service
            .handle_packet(
                &peer,
                vec![Message::LobbyPlayerJoined {
                    session_guid: guid,
                    user_id: alice,
                }],
            )
            .await;
        assert_eq!(record.snapshot().participant_count, 1);

        service
            .handle_packet(
                &peer,
                vec![Message::LobbyPlayerLeft {
                    session_guid: guid,
                    user_id: alice,
                }],
            )
            .await;
        assert_eq!(record.snapshot().phase, SessionPhaseKind::Idle);
    }

    #[tokio::test]
    async fn test_disconnect_unregisters_before_the_event() {
        let (service, mut events) = service(None);
        let (peer, _rx) = Peer::new("127.0.0.1:5100".parse().unwrap());
        service.attach_peer(peer.clone()).await;
        service.handle_packet(&peer, vec![register_message(42)]).await;
        assert_eq!(service.registry.len().await, 1);

        service.detach_peer(&peer).await;
        assert_eq!(service.registry.len().await, 0);

        // Unregistered fires strictly before the service disconnect event.
        let mut order = Vec::new();
        while let Ok(event) = events.try_recv() {
            match event {
                RelayEvent::GameServerUnregistered { .. } => order.push("unregistered"),
                RelayEvent::ServicePeerDisconnected { .. } => order.push("disconnected"),
                _ => {}
            }
        }
        assert_eq!(order, vec!["unregistered", "disconnected"]);
    }

    #[tokio::test]
    async fn test_registration_update_changes_visibility_and_capacity() {
        let (service, _events) = service(None);
        let (peer, _rx) = Peer::new("127.0.0.1:5100".parse().unwrap());
        service.attach_peer(peer.clone()).await;
        service.handle_packet(&peer, vec![register_message(42)]).await;

        service
            .handle_packet(
                &peer,
                vec![Message::GameServerRegistrationUpdate {
                    is_public: false,
                    capacity: 8,
                }],
            )
            .await;

        let snap = service.registry.get(42).await.unwrap().snapshot();
        assert!(!snap.is_public);
        assert_eq!(snap.capacity, 8);
    }
}
