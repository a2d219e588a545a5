//! Transaction service: placeholder in-app-purchase reconciliation.
//!
//! Purchases are not persisted by the relay; the service acknowledges
//! reconciliation requests with an empty balance so clients proceed.

use super::Service;
use crate::error::ServiceError;
use crate::events::EventSender;
use crate::peer::Peer;
use crate::protocol::Message;
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::json;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

pub const TRANSACTION_SERVICE: &str = "transaction";

pub struct TransactionService {
    peers: DashMap<Uuid, Arc<Peer>>,
    events: EventSender,
}

impl TransactionService {
    pub fn new(events: EventSender) -> Self {
        Self {
            peers: DashMap::new(),
            events,
        }
    }
}

#[async_trait]
impl Service for TransactionService {
    fn name(&self) -> &'static str {
        TRANSACTION_SERVICE
    }

    fn path(&self) -> &'static str {
        "/transaction"
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
            Message::ReconcileIAP { user_id, .. } => {
                self.send(
                    peer,
                    &[Message::ReconcileIAPResult {
                        user_id,
                        iap_data: json!({"balance": 0, "transactions": []}),
                    }],
                );
            }
            other => debug!("Transaction service ignoring {}", other.type_name()),
        }
        Ok(())
    }
}
