//! Matching service: binds client session requests to registered game
//! servers.
//!
//! The engine filters registry candidates against the request's constraints,
//! ranks them under the configured policy, and allocates with a CAS on the
//! chosen record so concurrent requests never double-book a server. When
//! `force_into_any_session` is on and nothing matches, constraints are
//! relaxed progressively (level, then mode, then region) before giving up.

use super::serverdb::SERVERDB_SERVICE;
use super::Service;
use crate::error::ServiceError;
use crate::events::{emit, EventSender, RelayEvent};
use crate::peer::{Peer, SessionSlot};
use crate::protocol::messages::ServerPing;
use crate::protocol::Message;
use crate::registry::{GameServerRegistry, GameServerSnapshot, RegisteredGameServer, SessionInfo, SessionPhaseKind};
use crate::session_cache::SessionCache;
use crate::symbols::Symbol;
use crate::xplatform::XPlatformId;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const MATCHING_SERVICE: &str = "matching";

/// Ping assumed for servers the client did not report a measurement for.
const ASSUMED_PING_MS: u32 = 150;

/// Candidate ordering policy, selected at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchingPolicy {
    /// Fill partially-full sessions first; ping breaks ties.
    #[default]
    PopulationFirst,
    /// Lowest client-reported ping first; population breaks ties.
    LowPingFirst,
}

impl std::str::FromStr for MatchingPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "population_first" => Ok(MatchingPolicy::PopulationFirst),
            "low_ping_first" => Ok(MatchingPolicy::LowPingFirst),
            other => Err(format!("unknown matching policy: {other}")),
        }
    }
}

/// Constraints distilled from one lobby request. `None` means unconstrained.
#[derive(Debug, Clone)]
struct SessionQuery {
    region: Option<Symbol>,
    version_lock: Symbol,
    level: Option<Symbol>,
    mode: Option<Symbol>,
}

impl SessionQuery {
    /// Requests use a zero symbol for "any region".
    fn from_request(region: Symbol, version_lock: Symbol, level: Symbol, mode: Symbol) -> Self {
        let optional = |s: Symbol| (s != Symbol(0)).then_some(s);
        Self {
            region: optional(region),
            version_lock,
            level: optional(level),
            mode: optional(mode),
        }
    }

    /// The relaxation ladder: drop level, then mode, then region.
    fn relaxed_stages(&self) -> Vec<SessionQuery> {
        let mut stages = vec![self.clone()];
        let mut current = self.clone();
        if current.level.take().is_some() {
            stages.push(current.clone());
        }
        if current.mode.take().is_some() {
            stages.push(current.clone());
        }
        if current.region.take().is_some() {
            stages.push(current);
        }
        stages
    }
}

pub struct MatchingService {
    peers: DashMap<Uuid, Arc<Peer>>,
    events: EventSender,
    registry: Arc<GameServerRegistry>,
    sessions: Arc<SessionCache>,
    policy: MatchingPolicy,
    force_into_any_session: bool,
}

impl MatchingService {
    pub fn new(
        registry: Arc<GameServerRegistry>,
        sessions: Arc<SessionCache>,
        policy: MatchingPolicy,
        force_into_any_session: bool,
        events: EventSender,
    ) -> Self {
        Self {
            peers: DashMap::new(),
            events,
            registry,
            sessions,
            policy,
            force_into_any_session,
        }
    }

    fn verify_session(&self, user_id: &XPlatformId, session_guid: &Uuid) -> bool {
        self.sessions.validate(session_guid, user_id)
    }

    fn fail(&self, peer: &Arc<Peer>, reason: &str) {
        self.send(
            peer,
            &[Message::LobbySessionFailure {
                reason: reason.into(),
            }],
        );
    }

    /// Ranks committed snapshots best-first under the configured policy.
    fn rank(
        &self,
        mut candidates: Vec<(Arc<RegisteredGameServer>, GameServerSnapshot)>,
        pings: &HashMap<u64, u32>,
    ) -> Vec<(Arc<RegisteredGameServer>, GameServerSnapshot)> {
        let ping_of = |snapshot: &GameServerSnapshot| {
            pings
                .get(&snapshot.server_id)
                .copied()
                .unwrap_or(ASSUMED_PING_MS)
        };
        match self.policy {
            MatchingPolicy::PopulationFirst => {
                candidates.sort_by_key(|(_, s)| {
                    (std::cmp::Reverse(s.participant_count), ping_of(s), s.server_id)
                });
            }
            MatchingPolicy::LowPingFirst => {
                candidates.sort_by_key(|(_, s)| {
                    (ping_of(s), std::cmp::Reverse(s.participant_count), s.server_id)
                });
            }
        }
        candidates
    }

    /// Public candidates for a query stage, with their committed snapshots.
    async fn stage_candidates(
        &self,
        query: &SessionQuery,
    ) -> Vec<(Arc<RegisteredGameServer>, GameServerSnapshot)> {
        self.registry
            .candidates(query.region, query.version_lock)
            .await
            .into_iter()
            .map(|record| {
                let snapshot = record.snapshot();
                (record, snapshot)
            })
            .filter(|(_, s)| s.is_public)
            .collect()
    }

    /// Allocates an idle server for a new session, retrying down the ranked
    /// list when the CAS loses a race, and commits by instructing the owning
    /// ServerDB peer to host it.
    async fn create_session(
        &self,
        peer: &Arc<Peer>,
        query: &SessionQuery,
        level: Symbol,
        mode: Symbol,
        team_index: i16,
        pings: &HashMap<u64, u32>,
        session_settings: &Value,
    ) -> Option<Message> {
        let stages = if self.force_into_any_session {
            query.relaxed_stages()
        } else {
            vec![query.clone()]
        };

        for stage in &stages {
            let idle: Vec<_> = self
                .stage_candidates(stage)
                .await
                .into_iter()
                .filter(|(_, s)| s.phase == SessionPhaseKind::Idle)
                .collect();

            for (record, _) in self.rank(idle, pings) {
                let session_guid = Uuid::new_v4();
                let session = SessionInfo {
                    session_guid,
                    level_symbol: level,
                    game_mode_symbol: mode,
                };
                if !record.try_begin_session(session) {
                    // Lost the race; the next candidate gets a fresh guid.
                    continue;
                }

                let Some(owner) = record.peer.upgrade() else {
                    record.end_session();
                    continue;
                };
                let notified = owner.send(&[Message::LobbySessionNew {
                    session_guid,
                    server_id: record.server_id,
                    level_symbol: level,
                    game_mode_symbol: mode,
                    session_settings: session_settings.clone(),
                }]);
                if !notified {
                    record.end_session();
                    continue;
                }
                emit(
                    &self.events,
                    RelayEvent::ServicePacketSent {
                        service: SERVERDB_SERVICE,
                        peer_id: owner.id(),
                        message_count: 1,
                    },
                );

                info!(
                    "🎯 Allocated session {session_guid} on server {} for {}",
                    record.server_id,
                    peer.address()
                );
                peer.set_session_slot(
                    self.name(),
                    SessionSlot::MatchedSession {
                        session_guid,
                        server_id: record.server_id,
                    },
                );
                return Some(Message::LobbySessionSuccessv5 {
                    session_guid,
                    endpoint_address: record.external_address,
                    endpoint_port: record.port,
                    team_index,
                });
            }
            debug!("No idle candidate at stage {stage:?}");
        }
        None
    }

    /// Picks the best joinable active session matching the query.
    async fn find_session(
        &self,
        peer: &Arc<Peer>,
        query: &SessionQuery,
        team_index: i16,
        pings: &HashMap<u64, u32>,
    ) -> Option<Message> {
        let stages = if self.force_into_any_session {
            query.relaxed_stages()
        } else {
            vec![query.clone()]
        };

        for stage in &stages {
            let joinable: Vec<_> = self
                .stage_candidates(stage)
                .await
                .into_iter()
                .filter(|(_, s)| {
                    s.phase == SessionPhaseKind::SessionActive
                        && s.participant_count < s.capacity as usize
                        && stage.level.map_or(true, |l| s.level_symbol == Some(l))
                        && stage.mode.map_or(true, |m| s.game_mode_symbol == Some(m))
                })
                .collect();

            if let Some((record, snapshot)) = self.rank(joinable, pings).into_iter().next() {
                let session_guid = snapshot
                    .session_guid
                    .expect("active sessions always carry a guid");
                peer.set_session_slot(
                    self.name(),
                    SessionSlot::MatchedSession {
                        session_guid,
                        server_id: record.server_id,
                    },
                );
                return Some(Message::LobbySessionSuccessv5 {
                    session_guid,
                    endpoint_address: record.external_address,
                    endpoint_port: record.port,
                    team_index,
                });
            }
        }
        None
    }

    /// Joins a specific session by guid.
    async fn join_session(
        &self,
        peer: &Arc<Peer>,
        lobby_session_guid: &Uuid,
        team_index: i16,
    ) -> Option<Message> {
        let record = self.registry.find_by_session(lobby_session_guid).await?;
        let snapshot = record.snapshot();
        if snapshot.phase != SessionPhaseKind::SessionActive
            || !snapshot.is_public
            || snapshot.participant_count >= snapshot.capacity as usize
        {
            return None;
        }

        peer.set_session_slot(
            self.name(),
            SessionSlot::MatchedSession {
                session_guid: *lobby_session_guid,
                server_id: record.server_id,
            },
        );
        Some(Message::LobbySessionSuccessv5 {
            session_guid: *lobby_session_guid,
            endpoint_address: record.external_address,
            endpoint_port: record.port,
            team_index,
        })
    }
}

fn ping_map(pings: &[ServerPing]) -> HashMap<u64, u32> {
    pings.iter().map(|p| (p.server_id, p.ping_ms)).collect()
}

#[async_trait]
impl Service for MatchingService {
    fn name(&self) -> &'static str {
        MATCHING_SERVICE
    }

    fn path(&self) -> &'static str {
        "/matching"
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
            Message::LobbyCreateSessionRequestv9 {
                user_id,
                session_guid,
                region_symbol,
                version_lock,
                level_symbol,
                game_mode_symbol,
                team_index,
                server_pings,
                session_settings,
            } => {
                if !self.verify_session(&user_id, &session_guid) {
                    warn!("Create-session from {user_id} with an invalid session");
                    self.fail(peer, "unauthorized");
                    return Ok(());
                }
                let query = SessionQuery::from_request(
                    region_symbol,
                    version_lock,
                    level_symbol,
                    game_mode_symbol,
                );
                match self
                    .create_session(
                        peer,
                        &query,
                        level_symbol,
                        game_mode_symbol,
                        team_index,
                        &ping_map(&server_pings),
                        &session_settings,
                    )
                    .await
                {
                    Some(reply) => self.send(peer, &[reply]),
                    None => self.fail(peer, "no servers"),
                }
            }

            Message::LobbyFindSessionRequestv11 {
                user_id,
                session_guid,
                region_symbol,
                version_lock,
                level_symbol,
                game_mode_symbol,
                team_index,
                server_pings,
            } => {
                if !self.verify_session(&user_id, &session_guid) {
                    warn!("Find-session from {user_id} with an invalid session");
                    self.fail(peer, "unauthorized");
                    return Ok(());
                }
                let query = SessionQuery::from_request(
                    region_symbol,
                    version_lock,
                    level_symbol,
                    game_mode_symbol,
                );
                match self
                    .find_session(peer, &query, team_index, &ping_map(&server_pings))
                    .await
                {
                    Some(reply) => self.send(peer, &[reply]),
                    None => self.fail(peer, "no sessions"),
                }
            }

            Message::LobbyJoinSessionRequestv7 {
                user_id,
                session_guid,
                lobby_session_guid,
                team_index,
            } => {
                if !self.verify_session(&user_id, &session_guid) {
                    warn!("Join-session from {user_id} with an invalid session");
                    self.fail(peer, "unauthorized");
                    return Ok(());
                }
                match self.join_session(peer, &lobby_session_guid, team_index).await {
                    Some(reply) => self.send(peer, &[reply]),
                    None => self.fail(peer, "session unavailable"),
                }
            }

            other => debug!("Matching service ignoring {}", other.type_name()),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::event_channel;
    use crate::peer::PeerCommand;
    use crate::protocol::{decode_packet, DEFAULT_MAX_MESSAGE_BYTES};
    use crate::registry::RegistrationRequest;
    use crate::symbols::SymbolCache;
    use serde_json::json;
    use std::net::Ipv4Addr;
    use std::time::Duration;
    use tokio::sync::mpsc;

    const REGION: Symbol = Symbol(100);
    const OTHER_REGION: Symbol = Symbol(101);
    const VERSION: Symbol = Symbol(777);

    fn user(n: u64) -> XPlatformId {
        XPlatformId::new(7, n)
    }

    struct Fixture {
        service: Arc<MatchingService>,
        registry: Arc<GameServerRegistry>,
        sessions: Arc<SessionCache>,
        // Keeps ServerDB peers (and thus records' weak refs) alive.
        gameservers: Vec<(Arc<Peer>, mpsc::UnboundedReceiver<PeerCommand>)>,
    }

    impl Fixture {
        fn new(policy: MatchingPolicy, force: bool) -> Self {
            let mut symbols = SymbolCache::new();
            symbols.insert("us-east", REGION);
            symbols.insert("eu-west", OTHER_REGION);
            let (events, _rx) = event_channel();
            let registry = Arc::new(GameServerRegistry::new(
                Arc::new(symbols),
                None,
                events.clone(),
            ));
            let sessions = Arc::new(SessionCache::new(
                Duration::from_secs(3600),
                Duration::from_secs(300),
            ));
            let service = Arc::new(MatchingService::new(
                registry.clone(),
                sessions.clone(),
                policy,
                force,
                events,
            ));
            Self {
                service,
                registry,
                sessions,
                gameservers: Vec::new(),
            }
        }

        async fn add_server(&mut self, server_id: u64, region: Symbol) -> Arc<RegisteredGameServer> {
            let (peer, rx) = Peer::new("127.0.0.1:5200".parse().unwrap());
            let record = self
                .registry
                .register(
                    &peer,
                    &RegistrationRequest {
                        server_id,
                        internal_address: Ipv4Addr::new(10, 0, 0, 5),
                        external_address: Ipv4Addr::new(203, 0, 113, server_id as u8),
                        port: 6792,
                        region_symbol: region,
                        version_lock: VERSION,
                    },
                )
                .await
                .unwrap();
            self.gameservers.push((peer, rx));
            record
        }

        async fn client(&self, n: u64) -> (Arc<Peer>, mpsc::UnboundedReceiver<PeerCommand>, Uuid) {
            let (peer, rx) = Peer::new("127.0.0.1:5300".parse().unwrap());
            self.service.attach_peer(peer.clone()).await;
            let guid = self.sessions.issue(user(n));
            (peer, rx, guid)
        }
    }

    fn next_reply(rx: &mut mpsc::UnboundedReceiver<PeerCommand>) -> Message {
        match rx.try_recv().expect("expected a reply") {
            PeerCommand::Packet(bytes) => decode_packet(&bytes, DEFAULT_MAX_MESSAGE_BYTES)
                .unwrap()
                .remove(0),
            other => panic!("unexpected command {other:?}"),
        }
    }

    fn create_request(n: u64, session_guid: Uuid, region: Symbol) -> Message {
        Message::LobbyCreateSessionRequestv9 {
            user_id: user(n),
            session_guid,
            region_symbol: region,
            version_lock: VERSION,
            level_symbol: Symbol::of("arena"),
            game_mode_symbol: Symbol::of("social"),
            team_index: 0,
            server_pings: vec![],
            session_settings: json!({}),
        }
    }

    #[tokio::test]
    async fn test_create_prefers_populated_servers() {
        let mut fx = Fixture::new(MatchingPolicy::PopulationFirst, false);
        fx.add_server(1, REGION).await;
        let populated = fx.add_server(2, REGION).await;
        fx.add_server(3, REGION).await;
        for n in 0..4 {
            populated.player_joined(user(100 + n));
        }

        let (peer, mut rx, guid) = fx.client(1).await;
        fx.service
            .handle_packet(&peer, vec![create_request(1, guid, REGION)])
            .await;

        // The 4/12 server wins; it is told to host and ends up locked.
        let reply = next_reply(&mut rx);
        let issued = match reply {
            Message::LobbySessionSuccessv5 {
                session_guid,
                endpoint_address,
                endpoint_port,
                ..
            } => {
                assert_eq!(endpoint_address, populated.external_address);
                assert_eq!(endpoint_port, populated.port);
                session_guid
            }
            other => panic!("expected session success, got {other:?}"),
        };

        let snap = populated.snapshot();
        assert_eq!(snap.phase, SessionPhaseKind::SessionLocked);
        assert_eq!(snap.session_guid, Some(issued));

        // The owning ServerDB peer received the LobbySessionNew commit.
        let owner_rx = &mut fx.gameservers[1].1;
        match next_reply(owner_rx) {
            Message::LobbySessionNew {
                session_guid,
                server_id,
                ..
            } => {
                assert_eq!(session_guid, issued);
                assert_eq!(server_id, 2);
            }
            other => panic!("expected LobbySessionNew, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_low_ping_policy_overrides_population() {
        let mut fx = Fixture::new(MatchingPolicy::LowPingFirst, false);
        let far = fx.add_server(1, REGION).await;
        let near = fx.add_server(2, REGION).await;
        far.player_joined(user(50));

        let (peer, mut rx, guid) = fx.client(1).await;
        fx.service
            .handle_packet(
                &peer,
                vec![Message::LobbyCreateSessionRequestv9 {
                    user_id: user(1),
                    session_guid: guid,
                    region_symbol: REGION,
                    version_lock: VERSION,
                    level_symbol: Symbol::of("arena"),
                    game_mode_symbol: Symbol::of("social"),
                    team_index: 0,
                    server_pings: vec![
                        ServerPing { server_id: 1, ping_ms: 120 },
                        ServerPing { server_id: 2, ping_ms: 25 },
                    ],
                    session_settings: json!({}),
                }],
            )
            .await;

        match next_reply(&mut rx) {
            Message::LobbySessionSuccessv5 { endpoint_address, .. } => {
                assert_eq!(endpoint_address, near.external_address);
            }
            other => panic!("expected session success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_invalid_login_session_is_refused() {
        let mut fx = Fixture::new(MatchingPolicy::PopulationFirst, false);
        fx.add_server(1, REGION).await;

        let (peer, mut rx, _) = fx.client(1).await;
        fx.service
            .handle_packet(&peer, vec![create_request(1, Uuid::new_v4(), REGION)])
            .await;

        match next_reply(&mut rx) {
            Message::LobbySessionFailure { reason } => assert_eq!(reason, "unauthorized"),
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(!peer.is_closed());
    }

    #[tokio::test]
    async fn test_region_mismatch_without_force_fails() {
        let mut fx = Fixture::new(MatchingPolicy::PopulationFirst, false);
        fx.add_server(1, REGION).await;

        let (peer, mut rx, guid) = fx.client(1).await;
        fx.service
            .handle_packet(&peer, vec![create_request(1, guid, OTHER_REGION)])
            .await;

        match next_reply(&mut rx) {
            Message::LobbySessionFailure { reason } => assert_eq!(reason, "no servers"),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_forced_fallback_drops_the_region_constraint() {
        let mut fx = Fixture::new(MatchingPolicy::PopulationFirst, true);
        let record = fx.add_server(1, REGION).await;

        let (peer, mut rx, guid) = fx.client(1).await;
        fx.service
            .handle_packet(&peer, vec![create_request(1, guid, OTHER_REGION)])
            .await;

        // The only server is in the wrong region, but force placement
        // relaxes the constraint and the normal commit sequence follows.
        match next_reply(&mut rx) {
            Message::LobbySessionSuccessv5 { endpoint_address, .. } => {
                assert_eq!(endpoint_address, record.external_address);
            }
            other => panic!("expected session success, got {other:?}"),
        }
        assert_eq!(record.snapshot().phase, SessionPhaseKind::SessionLocked);
        match next_reply(&mut fx.gameservers[0].1) {
            Message::LobbySessionNew { server_id: 1, .. } => {}
            other => panic!("expected LobbySessionNew, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_concurrent_creates_never_double_book() {
        let mut fx = Fixture::new(MatchingPolicy::PopulationFirst, false);
        fx.add_server(1, REGION).await;
        fx.add_server(2, REGION).await;

        let mut clients = Vec::new();
        for n in 0..8 {
            clients.push(fx.client(n).await);
        }

        let mut handles = Vec::new();
        for (n, (peer, _rx, guid)) in clients.iter().enumerate() {
            let service = fx.service.clone();
            let peer = peer.clone();
            let request = create_request(n as u64, *guid, REGION);
            handles.push(tokio::spawn(async move {
                service.handle_packet(&peer, vec![request]).await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let mut successes: Vec<Uuid> = Vec::new();
        let mut failures = 0;
        for (_, rx, _) in &mut clients {
            match next_reply(rx) {
                Message::LobbySessionSuccessv5 { session_guid, .. } => successes.push(session_guid),
                Message::LobbySessionFailure { .. } => failures += 1,
                other => panic!("unexpected reply {other:?}"),
            }
        }

        // Two idle servers: exactly two winners with distinct sessions.
        assert_eq!(successes.len(), 2);
        assert_eq!(failures, 6);
        assert_ne!(successes[0], successes[1]);
    }

    #[tokio::test]
    async fn test_find_joins_an_active_session_with_room() {
        let mut fx = Fixture::new(MatchingPolicy::PopulationFirst, false);
        let record = fx.add_server(1, REGION).await;

        let guid = Uuid::new_v4();
        record.try_begin_session(SessionInfo {
            session_guid: guid,
            level_symbol: Symbol::of("arena"),
            game_mode_symbol: Symbol::of("social"),
        });
        record.confirm_session_started(&guid);
        record.player_joined(user(60));

        let (peer, mut rx, login_guid) = fx.client(1).await;
        fx.service
            .handle_packet(
                &peer,
                vec![Message::LobbyFindSessionRequestv11 {
                    user_id: user(1),
                    session_guid: login_guid,
                    region_symbol: REGION,
                    version_lock: VERSION,
                    level_symbol: Symbol::of("arena"),
                    game_mode_symbol: Symbol::of("social"),
                    team_index: 1,
                    server_pings: vec![],
                }],
            )
            .await;

        match next_reply(&mut rx) {
            Message::LobbySessionSuccessv5 {
                session_guid,
                team_index,
                ..
            } => {
                assert_eq!(session_guid, guid);
                assert_eq!(team_index, 1);
            }
            other => panic!("expected session success, got {other:?}"),
        }
        // Find does not notify the game server.
        assert!(fx.gameservers[0].1.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_find_skips_full_and_wrong_level_sessions() {
        let mut fx = Fixture::new(MatchingPolicy::PopulationFirst, false);

        let full = fx.add_server(1, REGION).await;
        let full_guid = Uuid::new_v4();
        full.try_begin_session(SessionInfo {
            session_guid: full_guid,
            level_symbol: Symbol::of("arena"),
            game_mode_symbol: Symbol::of("social"),
        });
        full.confirm_session_started(&full_guid);
        full.set_registration(true, 2);
        full.player_joined(user(70));
        full.player_joined(user(71));

        let wrong_level = fx.add_server(2, REGION).await;
        let wrong_guid = Uuid::new_v4();
        wrong_level.try_begin_session(SessionInfo {
            session_guid: wrong_guid,
            level_symbol: Symbol::of("gym"),
            game_mode_symbol: Symbol::of("social"),
        });
        wrong_level.confirm_session_started(&wrong_guid);

        let (peer, mut rx, login_guid) = fx.client(1).await;
        fx.service
            .handle_packet(
                &peer,
                vec![Message::LobbyFindSessionRequestv11 {
                    user_id: user(1),
                    session_guid: login_guid,
                    region_symbol: REGION,
                    version_lock: VERSION,
                    level_symbol: Symbol::of("arena"),
                    game_mode_symbol: Symbol::of("social"),
                    team_index: 0,
                    server_pings: vec![],
                }],
            )
            .await;

        assert!(matches!(
            next_reply(&mut rx),
            Message::LobbySessionFailure { .. }
        ));
    }

    #[tokio::test]
    async fn test_join_by_guid() {
        let mut fx = Fixture::new(MatchingPolicy::PopulationFirst, false);
        let record = fx.add_server(1, REGION).await;

        let guid = Uuid::new_v4();
        record.try_begin_session(SessionInfo {
            session_guid: guid,
            level_symbol: Symbol::of("arena"),
            game_mode_symbol: Symbol::of("social"),
        });
        record.confirm_session_started(&guid);

        let (peer, mut rx, login_guid) = fx.client(1).await;
        fx.service
            .handle_packet(
                &peer,
                vec![Message::LobbyJoinSessionRequestv7 {
                    user_id: user(1),
                    session_guid: login_guid,
                    lobby_session_guid: guid,
                    team_index: 2,
                }],
            )
            .await;
        match next_reply(&mut rx) {
            Message::LobbySessionSuccessv5 { session_guid, .. } => assert_eq!(session_guid, guid),
            other => panic!("expected session success, got {other:?}"),
        }

        // An unknown guid is a failure, not a close.
        fx.service
            .handle_packet(
                &peer,
                vec![Message::LobbyJoinSessionRequestv7 {
                    user_id: user(1),
                    session_guid: login_guid,
                    lobby_session_guid: Uuid::new_v4(),
                    team_index: 2,
                }],
            )
            .await;
        assert!(matches!(
            next_reply(&mut rx),
            Message::LobbySessionFailure { .. }
        ));
        assert!(!peer.is_closed());
    }
}
