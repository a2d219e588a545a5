//! Config service: read-only game configuration keyed by `(type, identifier)`.

use super::Service;
use crate::error::ServiceError;
use crate::events::EventSender;
use crate::peer::Peer;
use crate::protocol::Message;
use crate::resources::ResourceStore;
use crate::symbols::SymbolCache;
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error};
use uuid::Uuid;

pub const CONFIG_SERVICE: &str = "config";

pub struct ConfigService {
    peers: DashMap<Uuid, Arc<Peer>>,
    events: EventSender,
    resources: ResourceStore,
    symbols: Arc<SymbolCache>,
}

impl ConfigService {
    pub fn new(resources: ResourceStore, symbols: Arc<SymbolCache>, events: EventSender) -> Self {
        Self {
            peers: DashMap::new(),
            events,
            resources,
            symbols,
        }
    }
}

#[async_trait]
impl Service for ConfigService {
    fn name(&self) -> &'static str {
        CONFIG_SERVICE
    }

    fn path(&self) -> &'static str {
        "/config"
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
            Message::ConfigRequest {
                config_type,
                identifier,
            } => {
                let type_symbol = self.symbols.resolve_or_derive(&config_type);
                let id_symbol = self.symbols.resolve_or_derive(&identifier);

                let reply = match self.resources.config_resource(&config_type, &identifier).await
                {
                    Ok(Some(resource)) => Message::ConfigSuccess {
                        type_symbol,
                        id_symbol,
                        resource,
                    },
                    Ok(None) => Message::ConfigFailure {
                        type_symbol,
                        id_symbol,
                        error_info: json!({
                            "status": 404,
                            "message": format!("no config {config_type}/{identifier}"),
                        }),
                    },
                    Err(err) => {
                        error!("Config lookup {config_type}/{identifier} failed: {err}");
                        Message::ConfigFailure {
                            type_symbol,
                            id_symbol,
                            error_info: json!({"status": 500, "message": "internal error"}),
                        }
                    }
                };
                self.send(peer, &[reply]);
            }
            other => debug!("Config service ignoring {}", other.type_name()),
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
    use crate::storage::{FilesystemStorage, Storage};
    use crate::symbols::SymbolCache;
    use serde_json::json;

    async fn service() -> (tempfile::TempDir, ConfigService) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(FilesystemStorage::new(dir.path(), true));
        storage.open().await.unwrap();
        storage
            .set("configs", "main_menu_main_menu", &json!({"news": "season 3"}))
            .await
            .unwrap();

        let (events, _rx) = event_channel();
        let service = ConfigService::new(
            ResourceStore::new(storage),
            Arc::new(SymbolCache::new()),
            events,
        );
        (dir, service)
    }

    fn request(config_type: &str, identifier: &str) -> Message {
        Message::ConfigRequest {
            config_type: config_type.into(),
            identifier: identifier.into(),
        }
    }

    async fn reply_to(service: &ConfigService, message: Message) -> Message {
        let (peer, mut rx) = Peer::new("127.0.0.1:4300".parse().unwrap());
        service.attach_peer(peer.clone()).await;
        service.handle_packet(&peer, vec![message]).await;
        match rx.try_recv().unwrap() {
            PeerCommand::Packet(bytes) => decode_packet(&bytes, DEFAULT_MAX_MESSAGE_BYTES)
                .unwrap()
                .remove(0),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_present_config_is_served() {
        let (_dir, service) = service().await;
        match reply_to(&service, request("main_menu", "main_menu")).await {
            Message::ConfigSuccess { resource, .. } => {
                assert_eq!(resource["news"], "season 3");
            }
            other => panic!("expected config success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_config_is_a_404_failure() {
        let (_dir, service) = service().await;
        match reply_to(&service, request("main_menu", "missing")).await {
            Message::ConfigFailure { error_info, .. } => {
                assert_eq!(error_info["status"], 404);
            }
            other => panic!("expected config failure, got {other:?}"),
        }
    }
}
