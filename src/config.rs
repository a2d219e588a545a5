//! Relay configuration.
//!
//! Loaded from a TOML file (created with defaults when absent), overridable
//! from the command line, and validated before the server starts.

use crate::protocol::DEFAULT_MAX_MESSAGE_BYTES;
use crate::services::matching::MatchingPolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

fn default_bind_address() -> String {
    "0.0.0.0:6789".to_string()
}

fn default_max_connections() -> usize {
    4096
}

fn default_shutdown_grace_secs() -> u64 {
    5
}

fn default_max_message_bytes() -> usize {
    DEFAULT_MAX_MESSAGE_BYTES
}

fn default_storage_root() -> String {
    "data".to_string()
}

fn default_session_ttl_secs() -> u64 {
    86_400
}

fn default_session_disconnected_timeout_secs() -> u64 {
    300
}

fn default_validate_timeout_ms() -> u64 {
    3000
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Top-level configuration, one section per subsystem.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RelayConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub symbols: SymbolSettings,
    #[serde(default)]
    pub login: LoginSettings,
    #[serde(default)]
    pub serverdb: ServerDbSettings,
    #[serde(default)]
    pub matching: MatchingSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Address the session server listens on.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Cap on concurrently connected peers across all services.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Grace given to in-flight handlers at shutdown.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
    /// Cap on a single wire message body.
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
    #[serde(default)]
    pub api: ApiSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ApiSettings {
    /// Required from game servers connecting to /serverdb when set.
    #[serde(default)]
    pub serverdb_api_key: Option<String>,
    /// Required on the admin endpoints when set.
    #[serde(default)]
    pub admin_api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Root directory of the JSON file tree.
    #[serde(default = "default_storage_root")]
    pub root: String,
    /// Disables the in-memory read cache.
    #[serde(default)]
    pub disable_cache: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SymbolSettings {
    /// JSON symbol cache to load at startup; empty cache when unset.
    #[serde(default)]
    pub cache_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginSettings {
    /// TTL of a login session while its peer stays connected.
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
    /// Shortened TTL applied when the peer disconnects.
    #[serde(default = "default_session_disconnected_timeout_secs")]
    pub session_disconnected_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerDbSettings {
    /// Probe a registering game server's public endpoint over UDP.
    #[serde(default)]
    pub validate_endpoint: bool,
    #[serde(default = "default_validate_timeout_ms")]
    pub validate_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MatchingSettings {
    #[serde(default)]
    pub policy: MatchingPolicy,
    /// Relax constraints progressively when nothing matches. Off unless a
    /// deployment opts in.
    #[serde(default)]
    pub force_into_any_session: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json_format: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            max_connections: default_max_connections(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            max_message_bytes: default_max_message_bytes(),
            api: ApiSettings::default(),
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
            disable_cache: false,
        }
    }
}

impl Default for LoginSettings {
    fn default() -> Self {
        Self {
            session_ttl_secs: default_session_ttl_secs(),
            session_disconnected_timeout_secs: default_session_disconnected_timeout_secs(),
        }
    }
}

impl Default for ServerDbSettings {
    fn default() -> Self {
        Self {
            validate_endpoint: false,
            validate_timeout_ms: default_validate_timeout_ms(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
        }
    }
}

impl RelayConfig {
    /// Loads configuration from a TOML file, creating a default file when
    /// none exists yet.
    pub async fn load_from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: RelayConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let default_config = RelayConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Checks the configuration for consistency before startup.
    pub fn validate(&self) -> Result<(), String> {
        if self.server.bind_address.parse::<std::net::SocketAddr>().is_err() {
            return Err(format!("Invalid bind address: {}", self.server.bind_address));
        }
        if self.server.max_connections == 0 {
            return Err("max_connections must be nonzero".to_string());
        }
        if self.server.max_message_bytes == 0 {
            return Err("max_message_bytes must be nonzero".to_string());
        }
        if self.login.session_ttl_secs == 0 {
            return Err("session_ttl_secs must be nonzero".to_string());
        }
        if self.serverdb.validate_endpoint && self.serverdb.validate_timeout_ms == 0 {
            return Err(
                "validate_timeout_ms must be nonzero when endpoint validation is on".to_string(),
            );
        }
        if self.storage.root.is_empty() {
            return Err("storage root cannot be empty".to_string());
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                self.logging.level
            ));
        }

        Ok(())
    }
}
