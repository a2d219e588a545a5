//! Central relay server for a multiplayer VR arena game.
//!
//! The relay authenticates clients, brokers authoritative profile and
//! configuration data, registers dedicated game servers (with optional UDP
//! liveness validation), and matches clients into sessions on those servers.
//! One listening endpoint demultiplexes WebSocket connections into the five
//! cooperating services by URL path; every service speaks the same
//! length-prefixed binary framing with its own message vocabulary.

pub mod config;
pub mod error;
pub mod events;
pub mod merge;
pub mod peer;
pub mod protocol;
pub mod registry;
pub mod resources;
pub mod server;
pub mod services;
pub mod session_cache;
pub mod storage;
pub mod symbols;
pub mod xplatform;

pub use config::RelayConfig;
pub use error::{FramingError, ServiceError};
pub use events::{event_channel, RelayEvent};
pub use peer::Peer;
pub use protocol::Message;
pub use registry::GameServerRegistry;
pub use server::RelayServer;
pub use session_cache::SessionCache;
pub use symbols::{Symbol, SymbolCache};
pub use xplatform::XPlatformId;
