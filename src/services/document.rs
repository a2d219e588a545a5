//! Document service: localized documents keyed by `(type, language)`.
//!
//! Document lookups are also reachable through the Login service; both paths
//! share [`document_reply`].

use super::Service;
use crate::error::ServiceError;
use crate::events::EventSender;
use crate::peer::Peer;
use crate::protocol::Message;
use crate::resources::ResourceStore;
use crate::symbols::SymbolCache;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, error};
use uuid::Uuid;

pub const DOCUMENT_SERVICE: &str = "document";

/// Resolves a document request to its success or failure reply.
///
/// Both the language and the document type must be known to the symbol
/// cache; anything else is a [`Message::DocumentFailure`].
pub(crate) async fn document_reply(
    resources: &ResourceStore,
    symbols: &SymbolCache,
    language: &str,
    doc_type: &str,
) -> Message {
    if symbols.resolve(language).is_none() {
        return Message::DocumentFailure {
            message: format!("unknown language {language}"),
        };
    }
    if symbols.resolve(doc_type).is_none() {
        return Message::DocumentFailure {
            message: format!("unknown document type {doc_type}"),
        };
    }

    match resources.document(doc_type, language).await {
        Ok(Some(document)) => Message::DocumentSuccess {
            document_symbol: symbols.resolve_or_derive(&format!("{doc_type}_{language}")),
            document,
        },
        Ok(None) => Message::DocumentFailure {
            message: format!("no document {doc_type} for language {language}"),
        },
        Err(err) => {
            error!("Document lookup {doc_type}/{language} failed: {err}");
            Message::DocumentFailure {
                message: "internal error".into(),
            }
        }
    }
}

pub struct DocumentService {
    peers: DashMap<Uuid, Arc<Peer>>,
    events: EventSender,
    resources: ResourceStore,
    symbols: Arc<SymbolCache>,
}

impl DocumentService {
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
impl Service for DocumentService {
    fn name(&self) -> &'static str {
        DOCUMENT_SERVICE
    }

    fn path(&self) -> &'static str {
        "/document"
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
            Message::DocumentRequestv2 { language, doc_type } => {
                let reply =
                    document_reply(&self.resources, &self.symbols, &language, &doc_type).await;
                self.send(peer, &[reply]);
            }
            other => debug!("Document service ignoring {}", other.type_name()),
        }
        Ok(())
    }
}
