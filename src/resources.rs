//! Persistent resource types and their storage accessors.
//!
//! Everything here is plain data with a JSON representation; the
//! [`ResourceStore`] wraps the storage contract with typed accessors and the
//! default values served when a deployment has not seeded a resource yet.

use crate::error::ServiceError;
use crate::storage::Storage;
use crate::xplatform::XPlatformId;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

pub const ACCOUNTS_COLLECTION: &str = "accounts";
pub const CONFIGS_COLLECTION: &str = "configs";
pub const DOCUMENTS_COLLECTION: &str = "documents";

const ACCESS_CONTROL_RESOURCE: &str = "access_control";
const CHANNEL_INFO_RESOURCE: &str = "channel_info";
const LOGIN_SETTINGS_RESOURCE: &str = "login_settings";

// ============================================================================
// Account
// ============================================================================

/// A stored account: the owner-mutable client profile plus the authoritative
/// server profile.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccountResource {
    pub profile: AccountProfile,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccountProfile {
    /// Free-form profile the owning client may replace.
    #[serde(default)]
    pub client: Value,
    /// Authoritative profile; mutated only through the Login service.
    pub server: ServerProfile,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerProfile {
    pub xplatform_id: XPlatformId,
    #[serde(rename = "displayname")]
    pub display_name: String,
    pub create_time: i64,
    pub update_time: i64,
    pub modify_time: i64,
    #[serde(default)]
    pub loadout: Value,
    /// Everything game servers have merged in beyond the typed fields.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl AccountResource {
    /// A fresh account created at first login.
    pub fn new(user_id: XPlatformId, display_name: String) -> Self {
        let now = Utc::now().timestamp();
        Self {
            profile: AccountProfile {
                client: json!({}),
                server: ServerProfile {
                    xplatform_id: user_id,
                    display_name,
                    create_time: now,
                    update_time: now,
                    modify_time: now,
                    loadout: json!({}),
                    extra: serde_json::Map::new(),
                },
            },
        }
    }

    /// Both sub-profiles, as sent to the owning client.
    pub fn full_profile_value(&self) -> Value {
        serde_json::to_value(&self.profile).expect("profile serialization cannot fail")
    }

    /// The server sub-profile only, as exposed to other users.
    pub fn server_profile_value(&self) -> Value {
        serde_json::to_value(&self.profile.server).expect("profile serialization cannot fail")
    }

    /// Stamps the modification timestamps after a profile write.
    pub fn touch(&mut self) {
        let now = Utc::now().timestamp();
        self.profile.server.update_time = now;
        self.profile.server.modify_time = now;
    }
}

// ============================================================================
// Access control
// ============================================================================

/// Allow/deny rules applied when a user presents an identity at login.
///
/// Patterns match rendered account keys and support `*` wildcards
/// (`OVR-*`, `*-123`). Deny wins over allow; an empty allow list allows
/// everyone not denied.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccessControlList {
    #[serde(default)]
    pub allow: Vec<String>,
    #[serde(default)]
    pub deny: Vec<String>,
}

impl AccessControlList {
    pub fn is_authorized(&self, account_key: &str) -> bool {
        if self.deny.iter().any(|p| pattern_matches(p, account_key)) {
            return false;
        }
        self.allow.is_empty() || self.allow.iter().any(|p| pattern_matches(p, account_key))
    }
}

/// Glob-style match: `*` spans any run of characters.
fn pattern_matches(pattern: &str, key: &str) -> bool {
    let Some((prefix, wild)) = pattern.split_once('*') else {
        return pattern == key;
    };
    if !key.starts_with(prefix) {
        return false;
    }

    let mut rest = &key[prefix.len()..];
    let segments: Vec<&str> = wild.split('*').collect();
    let (last, middle) = segments.split_last().expect("split never yields zero segments");
    for segment in middle {
        if segment.is_empty() {
            continue;
        }
        match rest.find(segment) {
            Some(pos) => rest = &rest[pos + segment.len()..],
            None => return false,
        }
    }
    rest.ends_with(last)
}

// ============================================================================
// Store
// ============================================================================

/// Typed accessors over the storage contract, shared by all services.
#[derive(Clone)]
pub struct ResourceStore {
    storage: Arc<dyn Storage>,
}

impl ResourceStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub async fn account(
        &self,
        user_id: &XPlatformId,
    ) -> Result<Option<AccountResource>, ServiceError> {
        let value = self
            .storage
            .get(ACCOUNTS_COLLECTION, &user_id.to_string())
            .await
            .map_err(ServiceError::internal)?;
        match value {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| ServiceError::internal(format!("corrupt account {user_id}: {e}"))),
            None => Ok(None),
        }
    }

    pub async fn save_account(&self, account: &AccountResource) -> Result<(), ServiceError> {
        let key = account.profile.server.xplatform_id.to_string();
        let value = serde_json::to_value(account).map_err(ServiceError::internal)?;
        self.storage
            .set(ACCOUNTS_COLLECTION, &key, &value)
            .await
            .map_err(ServiceError::internal)
    }

    pub async fn access_control(&self) -> Result<AccessControlList, ServiceError> {
        match self
            .storage
            .get_resource(ACCESS_CONTROL_RESOURCE)
            .await
            .map_err(ServiceError::internal)?
        {
            Some(value) => serde_json::from_value(value)
                .map_err(|e| ServiceError::internal(format!("corrupt access control list: {e}"))),
            None => Ok(AccessControlList::default()),
        }
    }

    pub async fn channel_info(&self) -> Result<Value, ServiceError> {
        let stored = self
            .storage
            .get_resource(CHANNEL_INFO_RESOURCE)
            .await
            .map_err(ServiceError::internal)?;
        Ok(stored.unwrap_or_else(default_channel_info))
    }

    pub async fn login_settings(&self) -> Result<Value, ServiceError> {
        let stored = self
            .storage
            .get_resource(LOGIN_SETTINGS_RESOURCE)
            .await
            .map_err(ServiceError::internal)?;
        Ok(stored.unwrap_or_else(default_login_settings))
    }

    pub async fn config_resource(
        &self,
        config_type: &str,
        identifier: &str,
    ) -> Result<Option<Value>, ServiceError> {
        self.storage
            .get(CONFIGS_COLLECTION, &format!("{config_type}_{identifier}"))
            .await
            .map_err(ServiceError::internal)
    }

    pub async fn document(
        &self,
        doc_type: &str,
        language: &str,
    ) -> Result<Option<Value>, ServiceError> {
        self.storage
            .get(DOCUMENTS_COLLECTION, &format!("{doc_type}_{language}"))
            .await
            .map_err(ServiceError::internal)
    }
}

fn default_channel_info() -> Value {
    json!({
        "group": [
            {"channeluuid": "90DD4DB5-B5DD-4655-839E-FDBE5F4BC0BF", "name": "THE ARENA", "description": "Competitive public matches"},
            {"channeluuid": "C9CF66E7-E1E4-4E5B-B5A7-E91E40B323CC", "name": "SOCIAL", "description": "Casual lobbies"}
        ]
    })
}

fn default_login_settings() -> Value {
    json!({
        "env": "live",
        "iap_unlocked": false,
        "remote_log_errors": false,
        "remote_log_metrics": false,
        "config_data": {}
    })
}
