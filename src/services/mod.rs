//! Service base: named message handlers bound to URL paths.
//!
//! Each service owns the peers connected to its path and dispatches every
//! decoded message to a typed handler. The provided methods implement the
//! lifecycle shared by all five services: attach/detach with events, packet
//! dispatch with unknown-message tolerance, and the rule that a handler error
//! escaping to the dispatcher closes that one peer and nothing else.

pub mod config_service;
pub mod document;
pub mod login;
pub mod matching;
pub mod serverdb;
pub mod transaction;

use crate::error::ServiceError;
use crate::events::{emit, EventSender, RelayEvent};
use crate::peer::Peer;
use crate::protocol::Message;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, error};
use uuid::Uuid;

pub use config_service::ConfigService;
pub use document::DocumentService;
pub use login::LoginService;
pub use matching::MatchingService;
pub use serverdb::ServerDbService;
pub use transaction::TransactionService;

#[async_trait]
pub trait Service: Send + Sync {
    fn name(&self) -> &'static str;

    /// The URL path this service is bound to, e.g. `/login`.
    fn path(&self) -> &'static str;

    fn peers(&self) -> &DashMap<Uuid, Arc<Peer>>;

    fn events(&self) -> &EventSender;

    /// Handles one decoded message.
    ///
    /// Handlers reply with typed failure messages themselves; an `Err` here
    /// means no protocol-level answer exists and the dispatcher will close
    /// the peer.
    async fn handle_message(&self, peer: &Arc<Peer>, message: Message)
        -> Result<(), ServiceError>;

    /// Service-specific reaction to a new peer.
    async fn peer_connected_hook(&self, _peer: &Arc<Peer>) {}

    /// Service-specific cleanup; runs before the disconnect event fires.
    async fn peer_disconnected_hook(&self, _peer: &Arc<Peer>) {}

    /// Adds a peer to this service and fires the connected event.
    async fn attach_peer(&self, peer: Arc<Peer>) {
        self.peers().insert(peer.id(), peer.clone());
        emit(
            self.events(),
            RelayEvent::ServicePeerConnected {
                service: self.name(),
                peer_id: peer.id(),
                endpoint: peer.address(),
            },
        );
        self.peer_connected_hook(&peer).await;
    }

    /// Removes a peer, running cleanup before the disconnect event fires so
    /// owned resources (registrations, sessions) are released first.
    async fn detach_peer(&self, peer: &Arc<Peer>) {
        if self.peers().remove(&peer.id()).is_none() {
            return;
        }
        self.peer_disconnected_hook(peer).await;
        emit(
            self.events(),
            RelayEvent::ServicePeerDisconnected {
                service: self.name(),
                peer_id: peer.id(),
                endpoint: peer.address(),
            },
        );
    }

    /// Dispatches every message of a decoded packet in arrival order.
    async fn handle_packet(&self, peer: &Arc<Peer>, messages: Vec<Message>) {
        emit(
            self.events(),
            RelayEvent::ServicePacketReceived {
                service: self.name(),
                peer_id: peer.id(),
                message_count: messages.len(),
            },
        );

        for message in messages {
            if let Message::Unknown(raw) = &message {
                debug!(
                    "Ignoring unknown message {} ({} byte body) on {}",
                    raw.type_symbol,
                    raw.body.len(),
                    self.name()
                );
                continue;
            }

            let type_name = message.type_name();
            if let Err(err) = self.handle_message(peer, message).await {
                error!(
                    "Unhandled {type_name} on {} from {}: {err}",
                    self.name(),
                    peer.address()
                );
                peer.close();
                break;
            }
        }
    }

    /// Sends a packet to a peer of this service and fires the sent event.
    fn send(&self, peer: &Arc<Peer>, messages: &[Message]) {
        if peer.send(messages) {
            emit(
                self.events(),
                RelayEvent::ServicePacketSent {
                    service: self.name(),
                    peer_id: peer.id(),
                    message_count: messages.len(),
                },
            );
        }
    }

    /// Fires the authenticated event for a peer. Callers gate this on
    /// [`Peer::update_user_authentication`] returning true.
    fn notify_authenticated(&self, peer: &Arc<Peer>) {
        if let Some(user_id) = peer.user_id() {
            emit(
                self.events(),
                RelayEvent::ServicePeerAuthenticated {
                    service: self.name(),
                    peer_id: peer.id(),
                    user_id,
                },
            );
        }
    }
}
