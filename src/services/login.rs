//! Login service: authentication, profiles, and login-time broadcasts.

use super::{document, Service};
use crate::error::ServiceError;
use crate::events::EventSender;
use crate::merge::merge_json;
use crate::peer::{Peer, SessionSlot};
use crate::protocol::Message;
use crate::resources::{AccountResource, ResourceStore};
use crate::session_cache::SessionCache;
use crate::symbols::SymbolCache;
use crate::xplatform::XPlatformId;
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const LOGIN_SERVICE: &str = "login";

pub struct LoginService {
    peers: DashMap<Uuid, Arc<Peer>>,
    events: EventSender,
    resources: ResourceStore,
    symbols: Arc<SymbolCache>,
    sessions: Arc<SessionCache>,
}

impl LoginService {
    pub fn new(
        resources: ResourceStore,
        symbols: Arc<SymbolCache>,
        sessions: Arc<SessionCache>,
        events: EventSender,
    ) -> Self {
        Self {
            peers: DashMap::new(),
            events,
            resources,
            symbols,
            sessions,
        }
    }

    fn verify_session(
        &self,
        user_id: &XPlatformId,
        session_guid: &Uuid,
    ) -> Result<(), ServiceError> {
        if self.sessions.validate(session_guid, user_id) {
            Ok(())
        } else {
            Err(ServiceError::Unauthenticated("Invalid Session".into()))
        }
    }

    /// The login sequence of §login: prior-session invalidation, ACL check,
    /// fresh session issue, then the success broadcast.
    async fn login(
        &self,
        peer: &Arc<Peer>,
        user_id: XPlatformId,
        account_info: &Value,
    ) -> Result<Vec<Message>, ServiceError> {
        // A re-login on the same connection invalidates the prior session.
        if let Some(SessionSlot::LoginSession { session_guid }) =
            peer.clear_session_slot(self.name())
        {
            self.sessions.remove(&session_guid);
        }

        if !user_id.is_valid() {
            return Err(ServiceError::BadRequest("malformed user identifier".into()));
        }

        // The ACL gate runs before any profile is read from storage.
        let acl = self.resources.access_control().await?;
        if !acl.is_authorized(&user_id.to_string()) {
            return Err(ServiceError::Forbidden(
                "user is not permitted by the access control list".into(),
            ));
        }

        let account = match self.resources.account(&user_id).await? {
            Some(account) => account,
            None => {
                let display_name = account_info
                    .get("displayname")
                    .and_then(Value::as_str)
                    .map(str::to_owned)
                    .unwrap_or_else(|| user_id.to_string());
                let account = AccountResource::new(user_id, display_name);
                self.resources.save_account(&account).await?;
                info!("👤 Created account {user_id} at first login");
                account
            }
        };

        let session_guid = self.sessions.issue(user_id);
        peer.set_session_slot(self.name(), SessionSlot::LoginSession { session_guid });
        if peer.update_user_authentication(user_id, account.profile.server.display_name.clone()) {
            self.notify_authenticated(peer);
        }

        let settings = self.resources.login_settings().await?;
        Ok(vec![
            Message::LoginSuccess {
                user_id,
                session_guid,
            },
            Message::TcpConnectionUnrequireEvent,
            Message::LoginSettings { settings },
        ])
    }

    async fn handle_login(
        &self,
        peer: &Arc<Peer>,
        user_id: XPlatformId,
        account_info: Value,
    ) {
        match self.login(peer, user_id, &account_info).await {
            Ok(messages) => self.send(peer, &messages),
            Err(err) => {
                if matches!(err, ServiceError::Internal(_)) {
                    error!("Login of {user_id} failed: {err}");
                }
                let forbidden = matches!(err, ServiceError::Forbidden(_));
                self.send(
                    peer,
                    &[Message::LoginFailure {
                        user_id,
                        status: err.status(),
                        reason: err.to_string(),
                    }],
                );
                if forbidden {
                    peer.close();
                }
            }
        }
    }

    async fn logged_in_profile(
        &self,
        user_id: XPlatformId,
        session_guid: Uuid,
    ) -> Result<Value, ServiceError> {
        self.verify_session(&user_id, &session_guid)?;
        let account = self
            .resources
            .account(&user_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("no account for {user_id}")))?;
        Ok(account.full_profile_value())
    }

    async fn other_user_profile(&self, user_id: XPlatformId) -> Result<Value, ServiceError> {
        // Deliberately no session check; only the server sub-profile leaves
        // the relay.
        let account = self
            .resources
            .account(&user_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("no account for {user_id}")))?;
        Ok(account.server_profile_value())
    }

    async fn update_profile(
        &self,
        user_id: XPlatformId,
        session_guid: Uuid,
        client_profile: Value,
    ) -> Result<(), ServiceError> {
        self.verify_session(&user_id, &session_guid)?;

        let claimed = client_profile
            .get("xplatform_id")
            .and_then(Value::as_str)
            .and_then(|s| s.parse::<XPlatformId>().ok());
        if claimed != Some(user_id) {
            return Err(ServiceError::BadRequest(
                "client profile identity does not match the caller".into(),
            ));
        }

        let mut account = self
            .resources
            .account(&user_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("no account for {user_id}")))?;
        account.profile.client = client_profile;
        account.touch();
        self.resources.save_account(&account).await
    }

    /// Deep-merges a game-server-reported delta into the server profile.
    async fn update_server_profile(
        &self,
        user_id: XPlatformId,
        delta: &Value,
    ) -> Result<(), ServiceError> {
        let mut account = self
            .resources
            .account(&user_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("no account for {user_id}")))?;

        let mut merged = account.server_profile_value();
        merge_json(&mut merged, delta);

        let claimed = merged
            .get("xplatform_id")
            .and_then(Value::as_str)
            .and_then(|s| s.parse::<XPlatformId>().ok());
        if claimed != Some(user_id) {
            return Err(ServiceError::BadRequest(
                "delta must not change the profile identity".into(),
            ));
        }

        account.profile.server = serde_json::from_value(merged)
            .map_err(|e| ServiceError::BadRequest(format!("delta produced an invalid profile: {e}")))?;
        self.resources.save_account(&account).await
    }

    /// Client-shipped log lines. Telemetry only: entries that parse are
    /// logged, entries that do not are dropped, and no acknowledgement is
    /// sent in either case.
    fn remote_logs(&self, user_id: &XPlatformId, log_level: u64, logs: &[String]) {
        for line in logs {
            match serde_json::from_str::<Value>(line) {
                Ok(entry) => {
                    let message = entry
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or(line.as_str());
                    debug!("Remote log [{user_id} lvl {log_level}]: {message}");
                }
                Err(err) => {
                    warn!("Dropping unparseable remote log line from {user_id}: {err}");
                }
            }
        }
    }
}

#[async_trait]
impl Service for LoginService {
    fn name(&self) -> &'static str {
        LOGIN_SERVICE
    }

    fn path(&self) -> &'static str {
        "/login"
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
            Message::LoginRequest {
                user_id,
                client_session_guid: _,
                account_info,
            } => {
                self.handle_login(peer, user_id, account_info).await;
            }

            Message::LoggedInUserProfileRequest {
                user_id,
                session_guid,
            } => {
                let reply = match self.logged_in_profile(user_id, session_guid).await {
                    Ok(profile) => Message::LoggedInUserProfileSuccess { user_id, profile },
                    Err(err) => Message::LoggedInUserProfileFailure {
                        user_id,
                        status: err.status(),
                        message: err.to_string(),
                    },
                };
                self.send(peer, &[reply]);
            }

            Message::OtherUserProfileRequest { user_id } => {
                let reply = match self.other_user_profile(user_id).await {
                    Ok(profile) => Message::OtherUserProfileSuccess { user_id, profile },
                    Err(err) => Message::OtherUserProfileFailure {
                        user_id,
                        status: err.status(),
                        message: err.to_string(),
                    },
                };
                self.send(peer, &[reply]);
            }

            Message::UpdateProfile {
                user_id,
                session_guid,
                client_profile,
            } => {
                let reply = match self.update_profile(user_id, session_guid, client_profile).await
                {
                    Ok(()) => Message::UpdateProfileSuccess { user_id },
                    Err(err) => Message::UpdateProfileFailure {
                        user_id,
                        status: err.status(),
                        message: err.to_string(),
                    },
                };
                self.send(peer, &[reply]);
            }

            Message::UserServerProfileUpdateRequest { user_id, delta } => {
                let reply = match self.update_server_profile(user_id, &delta).await {
                    Ok(()) => Message::UserServerProfileUpdateSuccess { user_id },
                    Err(err) => {
                        warn!("Server profile update for {user_id} rejected: {err}");
                        Message::UpdateProfileFailure {
                            user_id,
                            status: err.status(),
                            message: err.to_string(),
                        }
                    }
                };
                self.send(peer, &[reply]);
            }

            Message::ChannelInfoRequest => match self.resources.channel_info().await {
                Ok(channel_info) => {
                    self.send(peer, &[Message::ChannelInfoResponse { channel_info }]);
                }
                Err(err) => error!("Channel info lookup failed: {err}"),
            },

            Message::DocumentRequestv2 { language, doc_type } => {
                let reply =
                    document::document_reply(&self.resources, &self.symbols, &language, &doc_type)
                        .await;
                self.send(peer, &[reply]);
            }

            Message::RemoteLogSetv3 {
                user_id,
                log_level,
                logs,
            } => {
                self.remote_logs(&user_id, log_level, &logs);
            }

            other => {
                debug!("Login service ignoring {}", other.type_name());
            }
        }
        Ok(())
    }

    async fn peer_disconnected_hook(&self, peer: &Arc<Peer>) {
        // Keep the session around at a shortened TTL so a quick reconnect
        // can resume it.
        if let Some(SessionSlot::LoginSession { session_guid }) =
            peer.session_slot(self.name())
        {
            self.sessions.mark_disconnected(&session_guid);
        }
    }
}
