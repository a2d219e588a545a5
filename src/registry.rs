//! Registry of live dedicated game servers.
//!
//! The ServerDB service feeds this registry: each ServerDB peer registers
//! exactly one game server, and the registration lives until that peer
//! disconnects. Lookups go through secondary indexes by region and version
//! lock under a reader/writer lock; each record guards its mutable session
//! state with its own mutex, so concurrent allocators race on an atomic
//! idle -> session-locked transition and observers only ever see committed
//! states.

use crate::events::{emit, EventSender, RelayEvent};
use crate::peer::Peer;
use crate::symbols::{Symbol, SymbolCache};
use crate::xplatform::XPlatformId;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Session capacity assumed until the game server publishes its own.
pub const DEFAULT_SESSION_CAPACITY: u32 = 12;

#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("server id must be nonzero")]
    InvalidServerId,

    #[error("region symbol {0} is not in the symbol cache")]
    UnknownRegion(Symbol),

    #[error("external address {0} is not reachable by clients")]
    UnroutableAddress(Ipv4Addr),

    #[error("port must be nonzero")]
    InvalidPort,

    #[error("peer already registered server {0}")]
    AlreadyRegistered(u64),

    #[error("server id {0} is already registered")]
    DuplicateServerId(u64),

    #[error("endpoint validation failed: {0}")]
    ProbeFailed(String),
}

/// Fields a game server presents when registering.
#[derive(Debug, Clone)]
pub struct RegistrationRequest {
    pub server_id: u64,
    pub internal_address: Ipv4Addr,
    pub external_address: Ipv4Addr,
    pub port: u16,
    pub region_symbol: Symbol,
    pub version_lock: Symbol,
}

// ============================================================================
// Record state machine
// ============================================================================

/// The live game session hosted on a registered server, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionInfo {
    pub session_guid: Uuid,
    pub level_symbol: Symbol,
    pub game_mode_symbol: Symbol,
}

/// idle -> session-locked -> session-active -> idle, with removed terminal.
#[derive(Debug, Clone, PartialEq)]
enum SessionPhase {
    Idle,
    Locked(SessionInfo),
    Active(SessionInfo),
    Removed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionPhaseKind {
    Idle,
    SessionLocked,
    SessionActive,
    Removed,
}

struct RecordState {
    phase: SessionPhase,
    is_public: bool,
    capacity: u32,
    participants: HashSet<XPlatformId>,
}

/// A committed view of one record's mutable state.
#[derive(Debug, Clone, Serialize)]
pub struct GameServerSnapshot {
    pub server_id: u64,
    pub phase: SessionPhaseKind,
    pub session_guid: Option<Uuid>,
    pub level_symbol: Option<Symbol>,
    pub game_mode_symbol: Option<Symbol>,
    pub region_symbol: Symbol,
    pub version_lock: Symbol,
    pub is_public: bool,
    pub capacity: u32,
    pub participant_count: usize,
    pub endpoint: SocketAddr,
}

pub struct RegisteredGameServer {
    pub server_id: u64,
    /// Back-reference only: the peer's disconnect removes this record, never
    /// the other way around.
    pub peer: Weak<Peer>,
    pub peer_id: Uuid,
    pub internal_address: Ipv4Addr,
    pub external_address: Ipv4Addr,
    pub port: u16,
    pub region_symbol: Symbol,
    pub version_lock: Symbol,
    state: Mutex<RecordState>,
}

impl RegisteredGameServer {
    fn new(peer: &Arc<Peer>, req: &RegistrationRequest) -> Self {
        Self {
            server_id: req.server_id,
            peer: Arc::downgrade(peer),
            peer_id: peer.id(),
            internal_address: req.internal_address,
            external_address: req.external_address,
            port: req.port,
            region_symbol: req.region_symbol,
            version_lock: req.version_lock,
            state: Mutex::new(RecordState {
                phase: SessionPhase::Idle,
                is_public: true,
                capacity: DEFAULT_SESSION_CAPACITY,
                participants: HashSet::new(),
            }),
        }
    }

    pub fn endpoint(&self) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(self.external_address), self.port)
    }

    /// The CAS concurrent allocators race on: succeeds only from idle.
    pub fn try_begin_session(&self, session: SessionInfo) -> bool {
        let mut state = self.state.lock();
        if state.phase == SessionPhase::Idle {
            state.phase = SessionPhase::Locked(session);
            true
        } else {
            false
        }
    }

    /// The game server confirmed it is hosting the locked session.
    pub fn confirm_session_started(&self, session_guid: &Uuid) -> bool {
        let mut state = self.state.lock();
        match &state.phase {
            SessionPhase::Locked(info) if info.session_guid == *session_guid => {
                state.phase = SessionPhase::Active(info.clone());
                true
            }
            _ => false,
        }
    }

    /// Session over (reported end, or the lock was abandoned).
    pub fn end_session(&self) {
        let mut state = self.state.lock();
        if matches!(
            state.phase,
            SessionPhase::Locked(_) | SessionPhase::Active(_)
        ) {
            state.phase = SessionPhase::Idle;
            state.participants.clear();
        }
    }

    /// Returns the participant count after the join.
    pub fn player_joined(&self, user_id: XPlatformId) -> usize {
        let mut state = self.state.lock();
        state.participants.insert(user_id);
        state.participants.len()
    }

    /// Returns the participant count after the leave; an active session with
    /// nobody left in it goes back to idle.
    pub fn player_left(&self, user_id: &XPlatformId) -> usize {
        let mut state = self.state.lock();
        state.participants.remove(user_id);
        let remaining = state.participants.len();
        if remaining == 0 && matches!(state.phase, SessionPhase::Active(_)) {
            state.phase = SessionPhase::Idle;
        }
        remaining
    }

    pub fn set_registration(&self, is_public: bool, capacity: u32) {
        let mut state = self.state.lock();
        state.is_public = is_public;
        if capacity > 0 {
            state.capacity = capacity;
        }
    }

    fn mark_removed(&self) {
        let mut state = self.state.lock();
        state.phase = SessionPhase::Removed;
        state.participants.clear();
    }

    pub fn snapshot(&self) -> GameServerSnapshot {
        let state = self.state.lock();
        let (phase, session) = match &state.phase {
            SessionPhase::Idle => (SessionPhaseKind::Idle, None),
            SessionPhase::Locked(info) => (SessionPhaseKind::SessionLocked, Some(info)),
            SessionPhase::Active(info) => (SessionPhaseKind::SessionActive, Some(info)),
            SessionPhase::Removed => (SessionPhaseKind::Removed, None),
        };
        GameServerSnapshot {
            server_id: self.server_id,
            phase,
            session_guid: session.map(|s| s.session_guid),
            level_symbol: session.map(|s| s.level_symbol),
            game_mode_symbol: session.map(|s| s.game_mode_symbol),
            region_symbol: self.region_symbol,
            version_lock: self.version_lock,
            is_public: state.is_public,
            capacity: state.capacity,
            participant_count: state.participants.len(),
            endpoint: self.endpoint(),
        }
    }
}

// ============================================================================
// Endpoint validator
// ============================================================================

/// Liveness probe for a registering game server's public endpoint.
///
/// Wire format: an 8-byte random nonce sent raw over UDP; the probe succeeds
/// iff the identical 8 bytes come back from the probed address within the
/// timeout. Anything else received is discarded and the wait continues.
/// Probe failures are not retried; the game server is expected to republish.
pub struct EndpointValidator {
    timeout: Duration,
}

impl EndpointValidator {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub async fn probe(&self, endpoint: SocketAddr) -> Result<(), RegistrationError> {
        let socket = UdpSocket::bind(("0.0.0.0", 0))
            .await
            .map_err(|e| RegistrationError::ProbeFailed(format!("socket: {e}")))?;

        let nonce: [u8; 8] = rand::random();
        socket
            .send_to(&nonce, endpoint)
            .await
            .map_err(|e| RegistrationError::ProbeFailed(format!("send: {e}")))?;

        let wait = async {
            let mut buf = [0u8; 16];
            loop {
                let (len, from) = socket
                    .recv_from(&mut buf)
                    .await
                    .map_err(|e| RegistrationError::ProbeFailed(format!("recv: {e}")))?;
                if from == endpoint && buf[..len] == nonce {
                    return Ok(());
                }
                debug!("Discarding stray probe reply from {from}");
            }
        };

        match tokio::time::timeout(self.timeout, wait).await {
            Ok(result) => result,
            Err(_) => Err(RegistrationError::ProbeFailed(format!(
                "no echo from {endpoint} within {:?}",
                self.timeout
            ))),
        }
    }
}

// ============================================================================
// Registry
// ============================================================================

#[derive(Default)]
struct RegistryIndexes {
    by_id: HashMap<u64, Arc<RegisteredGameServer>>,
    by_region: HashMap<Symbol, HashSet<u64>>,
    by_version: HashMap<Symbol, HashSet<u64>>,
    by_peer: HashMap<Uuid, u64>,
}

pub struct GameServerRegistry {
    indexes: RwLock<RegistryIndexes>,
    symbols: Arc<SymbolCache>,
    validator: Option<EndpointValidator>,
    events: EventSender,
}

impl GameServerRegistry {
    pub fn new(
        symbols: Arc<SymbolCache>,
        validator: Option<EndpointValidator>,
        events: EventSender,
    ) -> Self {
        Self {
            indexes: RwLock::new(RegistryIndexes::default()),
            symbols,
            validator,
            events,
        }
    }

    /// Validates and registers a game server for the given ServerDB peer.
    ///
    /// The optional UDP probe runs after field validation and before the
    /// record is inserted; no lock is held across it.
    pub async fn register(
        &self,
        peer: &Arc<Peer>,
        req: &RegistrationRequest,
    ) -> Result<Arc<RegisteredGameServer>, RegistrationError> {
        if req.server_id == 0 {
            return Err(RegistrationError::InvalidServerId);
        }
        if req.port == 0 {
            return Err(RegistrationError::InvalidPort);
        }
        if !self.symbols.contains(req.region_symbol) {
            return Err(RegistrationError::UnknownRegion(req.region_symbol));
        }
        let ext = req.external_address;
        if ext.is_unspecified() || ext.is_multicast() || ext.is_broadcast() {
            return Err(RegistrationError::UnroutableAddress(ext));
        }

        {
            let indexes = self.indexes.read().await;
            if let Some(existing) = indexes.by_peer.get(&peer.id()) {
                return Err(RegistrationError::AlreadyRegistered(*existing));
            }
            if indexes.by_id.contains_key(&req.server_id) {
                return Err(RegistrationError::DuplicateServerId(req.server_id));
            }
        }

        if let Some(validator) = &self.validator {
            let endpoint = SocketAddr::new(IpAddr::V4(ext), req.port);
            validator.probe(endpoint).await?;
        }

        let record = Arc::new(RegisteredGameServer::new(peer, req));
        {
            let mut indexes = self.indexes.write().await;
            // Re-check under the write lock: the probe window is unguarded.
            if let Some(existing) = indexes.by_peer.get(&peer.id()) {
                return Err(RegistrationError::AlreadyRegistered(*existing));
            }
            if indexes.by_id.contains_key(&req.server_id) {
                return Err(RegistrationError::DuplicateServerId(req.server_id));
            }
            indexes.by_id.insert(req.server_id, record.clone());
            indexes
                .by_region
                .entry(req.region_symbol)
                .or_default()
                .insert(req.server_id);
            indexes
                .by_version
                .entry(req.version_lock)
                .or_default()
                .insert(req.server_id);
            indexes.by_peer.insert(peer.id(), req.server_id);
        }

        info!(
            "🎮 Registered game server {} at {} (region {})",
            req.server_id,
            record.endpoint(),
            self.symbols
                .name_of(req.region_symbol)
                .unwrap_or("<unknown>")
        );
        emit(
            &self.events,
            RelayEvent::GameServerRegistered {
                server_id: req.server_id,
            },
        );
        Ok(record)
    }

    /// Removes the registration owned by a disconnecting peer, if any.
    pub async fn unregister_peer(&self, peer_id: Uuid) -> Option<u64> {
        let record = {
            let mut indexes = self.indexes.write().await;
            let server_id = indexes.by_peer.remove(&peer_id)?;
            let record = indexes.by_id.remove(&server_id)?;
            if let Some(ids) = indexes.by_region.get_mut(&record.region_symbol) {
                ids.remove(&server_id);
            }
            if let Some(ids) = indexes.by_version.get_mut(&record.version_lock) {
                ids.remove(&server_id);
            }
            record
        };

        record.mark_removed();
        warn!("🎮 Unregistered game server {}", record.server_id);
        emit(
            &self.events,
            RelayEvent::GameServerUnregistered {
                server_id: record.server_id,
            },
        );
        Some(record.server_id)
    }

    pub async fn get(&self, server_id: u64) -> Option<Arc<RegisteredGameServer>> {
        self.indexes.read().await.by_id.get(&server_id).cloned()
    }

    /// All records matching an optional region and a required version lock.
    pub async fn candidates(
        &self,
        region_symbol: Option<Symbol>,
        version_lock: Symbol,
    ) -> Vec<Arc<RegisteredGameServer>> {
        let indexes = self.indexes.read().await;
        let by_version = match indexes.by_version.get(&version_lock) {
            Some(ids) => ids,
            None => return Vec::new(),
        };
        by_version
            .iter()
            .filter(|id| match region_symbol {
                Some(region) => indexes
                    .by_region
                    .get(&region)
                    .map(|ids| ids.contains(id))
                    .unwrap_or(false),
                None => true,
            })
            .filter_map(|id| indexes.by_id.get(id).cloned())
            .collect()
    }

    /// The record currently holding a session with this guid, if any.
    pub async fn find_by_session(&self, session_guid: &Uuid) -> Option<Arc<RegisteredGameServer>> {
        let indexes = self.indexes.read().await;
        indexes
            .by_id
            .values()
            .find(|record| record.snapshot().session_guid == Some(*session_guid))
            .cloned()
    }

    pub async fn snapshot_all(&self) -> Vec<GameServerSnapshot> {
        let indexes = self.indexes.read().await;
        let mut snapshots: Vec<_> = indexes.by_id.values().map(|r| r.snapshot()).collect();
        snapshots.sort_by_key(|s| s.server_id);
        snapshots
    }

    pub async fn len(&self) -> usize {
        self.indexes.read().await.by_id.len()
    }
}
