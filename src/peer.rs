//! Per-connection peer state.
//!
//! A peer is created when a connection upgrades onto a service and destroyed
//! on disconnect. It owns an ordered at-most-once send queue (drained by the
//! connection's writer task), the authenticated identity once login
//! completes, and one opaque session slot per service.

use crate::protocol::{encode_packet, Message};
use crate::xplatform::XPlatformId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Commands consumed by the connection's writer task, in enqueue order.
#[derive(Debug)]
pub enum PeerCommand {
    /// An encoded packet to deliver.
    Packet(Vec<u8>),
    /// Close the transport after flushing prior packets.
    Close,
}

/// Service-scoped state stashed on a peer.
///
/// Each service reads and writes only its own variant; the slot map is keyed
/// by service name so services never observe each other's state.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionSlot {
    /// Login service: the session guid issued to this connection.
    LoginSession { session_guid: Uuid },
    /// Matching service: the game session this client was placed into.
    MatchedSession { session_guid: Uuid, server_id: u64 },
    /// ServerDB service: the registration owned by this connection.
    GameServer { server_id: u64 },
}

#[derive(Default)]
struct PeerInner {
    user_id: Option<XPlatformId>,
    display_name: Option<String>,
    authenticated: bool,
    slots: HashMap<&'static str, SessionSlot>,
    closed: bool,
}

pub struct Peer {
    id: Uuid,
    address: SocketAddr,
    outbound: mpsc::UnboundedSender<PeerCommand>,
    inner: Mutex<PeerInner>,
}

impl Peer {
    /// Creates a peer and the receiving end of its send queue.
    ///
    /// The caller (the connection task, or a test observing replies) drains
    /// the receiver.
    pub fn new(address: SocketAddr) -> (std::sync::Arc<Peer>, mpsc::UnboundedReceiver<PeerCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let peer = std::sync::Arc::new(Peer {
            id: Uuid::new_v4(),
            address,
            outbound: tx,
            inner: Mutex::new(PeerInner::default()),
        });
        (peer, rx)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Encodes the messages as one packet and enqueues it.
    ///
    /// Returns false when the connection is already gone; callers treat that
    /// the same as a disconnect in progress.
    pub fn send(&self, messages: &[Message]) -> bool {
        if messages.is_empty() || self.inner.lock().closed {
            return false;
        }
        self.outbound
            .send(PeerCommand::Packet(encode_packet(messages)))
            .is_ok()
    }

    /// Requests transport close after pending packets flush. Idempotent.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        if !inner.closed {
            inner.closed = true;
            let _ = self.outbound.send(PeerCommand::Close);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn user_id(&self) -> Option<XPlatformId> {
        self.inner.lock().user_id
    }

    pub fn display_name(&self) -> Option<String> {
        self.inner.lock().display_name.clone()
    }

    /// Records the authenticated identity.
    ///
    /// Returns true only the first time, so the caller can fire the
    /// service-level authenticated event exactly once per peer.
    pub fn update_user_authentication(
        &self,
        user_id: XPlatformId,
        display_name: String,
    ) -> bool {
        let mut inner = self.inner.lock();
        inner.user_id = Some(user_id);
        inner.display_name = Some(display_name);
        let first = !inner.authenticated;
        inner.authenticated = true;
        first
    }

    pub fn set_session_slot(&self, service: &'static str, slot: SessionSlot) {
        self.inner.lock().slots.insert(service, slot);
    }

    pub fn session_slot(&self, service: &str) -> Option<SessionSlot> {
        self.inner.lock().slots.get(service).cloned()
    }

    pub fn clear_session_slot(&self, service: &str) -> Option<SessionSlot> {
        self.inner.lock().slots.remove(service)
    }
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("id", &self.id)
            .field("address", &self.address)
            .finish()
    }
}
