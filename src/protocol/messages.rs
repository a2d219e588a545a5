//! Typed message vocabulary for all five services.
//!
//! Every variant encodes to and decodes from the shared envelope in
//! [`super`]. Type symbols are derived from the variant's wire name with
//! [`Symbol::of`], so a peer built against the same names interoperates
//! without a shared symbol file. Unrecognized symbols decode to
//! [`Message::Unknown`] and are ignored by handlers rather than failing the
//! connection.

use super::io::{BodyReader, BodyWriter};
use super::RawMessage;
use crate::error::FramingError;
use crate::symbols::Symbol;
use crate::xplatform::XPlatformId;
use once_cell::sync::Lazy;
use serde_json::Value;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use uuid::Uuid;

/// A client-reported ping observation for one game server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerPing {
    pub server_id: u64,
    pub ping_ms: u32,
}

/// Every message the relay understands, across all services.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    // ------------------------------------------------------------------
    // Login service
    // ------------------------------------------------------------------
    LoginRequest {
        user_id: XPlatformId,
        client_session_guid: Uuid,
        account_info: Value,
    },
    LoginSuccess {
        user_id: XPlatformId,
        session_guid: Uuid,
    },
    LoginFailure {
        user_id: XPlatformId,
        status: u64,
        reason: String,
    },
    /// Control message permitting the transport to proceed after login.
    TcpConnectionUnrequireEvent,
    LoginSettings {
        settings: Value,
    },
    LoggedInUserProfileRequest {
        user_id: XPlatformId,
        session_guid: Uuid,
    },
    LoggedInUserProfileSuccess {
        user_id: XPlatformId,
        profile: Value,
    },
    LoggedInUserProfileFailure {
        user_id: XPlatformId,
        status: u64,
        message: String,
    },
    OtherUserProfileRequest {
        user_id: XPlatformId,
    },
    OtherUserProfileSuccess {
        user_id: XPlatformId,
        profile: Value,
    },
    OtherUserProfileFailure {
        user_id: XPlatformId,
        status: u64,
        message: String,
    },
    UpdateProfile {
        user_id: XPlatformId,
        session_guid: Uuid,
        client_profile: Value,
    },
    UpdateProfileSuccess {
        user_id: XPlatformId,
    },
    UpdateProfileFailure {
        user_id: XPlatformId,
        status: u64,
        message: String,
    },
    UserServerProfileUpdateRequest {
        user_id: XPlatformId,
        delta: Value,
    },
    UserServerProfileUpdateSuccess {
        user_id: XPlatformId,
    },
    ChannelInfoRequest,
    ChannelInfoResponse {
        channel_info: Value,
    },
    DocumentRequestv2 {
        language: String,
        doc_type: String,
    },
    DocumentSuccess {
        document_symbol: Symbol,
        document: Value,
    },
    DocumentFailure {
        message: String,
    },
    /// Batched client log lines shipped to the relay.
    RemoteLogSetv3 {
        user_id: XPlatformId,
        log_level: u64,
        logs: Vec<String>,
    },

    // ------------------------------------------------------------------
    // Config service
    // ------------------------------------------------------------------
    ConfigRequest {
        config_type: String,
        identifier: String,
    },
    ConfigSuccess {
        type_symbol: Symbol,
        id_symbol: Symbol,
        resource: Value,
    },
    ConfigFailure {
        type_symbol: Symbol,
        id_symbol: Symbol,
        error_info: Value,
    },

    // ------------------------------------------------------------------
    // Transaction service
    // ------------------------------------------------------------------
    ReconcileIAP {
        user_id: XPlatformId,
        session_guid: Uuid,
    },
    ReconcileIAPResult {
        user_id: XPlatformId,
        iap_data: Value,
    },

    // ------------------------------------------------------------------
    // ServerDB service
    // ------------------------------------------------------------------
    RegisterGameServer {
        server_id: u64,
        internal_address: Ipv4Addr,
        external_address: Ipv4Addr,
        port: u16,
        region_symbol: Symbol,
        version_lock: Symbol,
    },
    RegistrationSuccess {
        server_id: u64,
        external_address: Ipv4Addr,
    },
    RegistrationFailure {
        reason: String,
    },
    /// Relay -> game server: host a freshly allocated session.
    LobbySessionNew {
        session_guid: Uuid,
        server_id: u64,
        level_symbol: Symbol,
        game_mode_symbol: Symbol,
        session_settings: Value,
    },
    LobbySessionStartedv4 {
        session_guid: Uuid,
    },
    LobbySessionEnded {
        session_guid: Uuid,
    },
    LobbyPlayerJoined {
        session_guid: Uuid,
        user_id: XPlatformId,
    },
    LobbyPlayerLeft {
        session_guid: Uuid,
        user_id: XPlatformId,
    },
    GameServerRegistrationUpdate {
        is_public: bool,
        capacity: u32,
    },

    // ------------------------------------------------------------------
    // Matching service
    // ------------------------------------------------------------------
    LobbyCreateSessionRequestv9 {
        user_id: XPlatformId,
        session_guid: Uuid,
        region_symbol: Symbol,
        version_lock: Symbol,
        level_symbol: Symbol,
        game_mode_symbol: Symbol,
        team_index: i16,
        server_pings: Vec<ServerPing>,
        session_settings: Value,
    },
    LobbyFindSessionRequestv11 {
        user_id: XPlatformId,
        session_guid: Uuid,
        region_symbol: Symbol,
        version_lock: Symbol,
        level_symbol: Symbol,
        game_mode_symbol: Symbol,
        team_index: i16,
        server_pings: Vec<ServerPing>,
    },
    LobbyJoinSessionRequestv7 {
        user_id: XPlatformId,
        session_guid: Uuid,
        lobby_session_guid: Uuid,
        team_index: i16,
    },
    LobbySessionSuccessv5 {
        session_guid: Uuid,
        endpoint_address: Ipv4Addr,
        endpoint_port: u16,
        team_index: i16,
    },
    LobbySessionFailure {
        reason: String,
    },

    /// Envelope decoded fine but the type symbol is not in the vocabulary.
    Unknown(RawMessage),
}

type DecodeFn = fn(&mut BodyReader) -> Result<Message, FramingError>;

macro_rules! wire_names {
    ($($variant:ident => $name:literal),* $(,)?) => {
        impl Message {
            /// The wire name this message's type symbol is derived from.
            pub fn type_name(&self) -> &'static str {
                match self {
                    $(Message::$variant { .. } => $name,)*
                    Message::Unknown(_) => "Unknown",
                }
            }
        }
    };
}

wire_names! {
    LoginRequest => "LoginRequest",
    LoginSuccess => "LoginSuccess",
    LoginFailure => "LoginFailure",
    TcpConnectionUnrequireEvent => "TcpConnectionUnrequireEvent",
    LoginSettings => "LoginSettings",
    LoggedInUserProfileRequest => "LoggedInUserProfileRequest",
    LoggedInUserProfileSuccess => "LoggedInUserProfileSuccess",
    LoggedInUserProfileFailure => "LoggedInUserProfileFailure",
    OtherUserProfileRequest => "OtherUserProfileRequest",
    OtherUserProfileSuccess => "OtherUserProfileSuccess",
    OtherUserProfileFailure => "OtherUserProfileFailure",
    UpdateProfile => "UpdateProfile",
    UpdateProfileSuccess => "UpdateProfileSuccess",
    UpdateProfileFailure => "UpdateProfileFailure",
    UserServerProfileUpdateRequest => "UserServerProfileUpdateRequest",
    UserServerProfileUpdateSuccess => "UserServerProfileUpdateSuccess",
    ChannelInfoRequest => "ChannelInfoRequest",
    ChannelInfoResponse => "ChannelInfoResponse",
    DocumentRequestv2 => "DocumentRequestv2",
    DocumentSuccess => "DocumentSuccess",
    DocumentFailure => "DocumentFailure",
    RemoteLogSetv3 => "RemoteLogSetv3",
    ConfigRequest => "ConfigRequest",
    ConfigSuccess => "ConfigSuccess",
    ConfigFailure => "ConfigFailure",
    ReconcileIAP => "ReconcileIAP",
    ReconcileIAPResult => "ReconcileIAPResult",
    RegisterGameServer => "RegisterGameServer",
    RegistrationSuccess => "RegistrationSuccess",
    RegistrationFailure => "RegistrationFailure",
    LobbySessionNew => "LobbySessionNew",
    LobbySessionStartedv4 => "LobbySessionStartedv4",
    LobbySessionEnded => "LobbySessionEnded",
    LobbyPlayerJoined => "LobbyPlayerJoined",
    LobbyPlayerLeft => "LobbyPlayerLeft",
    GameServerRegistrationUpdate => "GameServerRegistrationUpdate",
    LobbyCreateSessionRequestv9 => "LobbyCreateSessionRequestv9",
    LobbyFindSessionRequestv11 => "LobbyFindSessionRequestv11",
    LobbyJoinSessionRequestv7 => "LobbyJoinSessionRequestv7",
    LobbySessionSuccessv5 => "LobbySessionSuccessv5",
    LobbySessionFailure => "LobbySessionFailure",
}

impl Message {
    /// The type symbol written into the envelope.
    pub fn type_symbol(&self) -> Symbol {
        match self {
            Message::Unknown(raw) => raw.type_symbol,
            other => Symbol::of(other.type_name()),
        }
    }

    /// Serializes the message body (envelope excluded).
    pub fn encode_body(&self) -> bytes::BytesMut {
        let mut w = BodyWriter::new();
        match self {
            Message::LoginRequest {
                user_id,
                client_session_guid,
                account_info,
            } => {
                w.put_xplatform(user_id);
                w.put_uuid(client_session_guid);
                w.put_json(account_info);
            }
            Message::LoginSuccess {
                user_id,
                session_guid,
            } => {
                w.put_xplatform(user_id);
                w.put_uuid(session_guid);
            }
            Message::LoginFailure {
                user_id,
                status,
                reason,
            } => {
                w.put_xplatform(user_id);
                w.put_u64(*status);
                w.put_str16(reason);
            }
            Message::TcpConnectionUnrequireEvent => {
                w.put_u8(0);
            }
            Message::LoginSettings { settings } => {
                w.put_json(settings);
            }
            Message::LoggedInUserProfileRequest {
                user_id,
                session_guid,
            } => {
                w.put_xplatform(user_id);
                w.put_uuid(session_guid);
            }
            Message::LoggedInUserProfileSuccess { user_id, profile } => {
                w.put_xplatform(user_id);
                w.put_json(profile);
            }
            Message::LoggedInUserProfileFailure {
                user_id,
                status,
                message,
            } => {
                w.put_xplatform(user_id);
                w.put_u64(*status);
                w.put_str16(message);
            }
            Message::OtherUserProfileRequest { user_id } => {
                w.put_xplatform(user_id);
            }
            Message::OtherUserProfileSuccess { user_id, profile } => {
                w.put_xplatform(user_id);
                w.put_json(profile);
            }
            Message::OtherUserProfileFailure {
                user_id,
                status,
                message,
            } => {
                w.put_xplatform(user_id);
                w.put_u64(*status);
                w.put_str16(message);
            }
            Message::UpdateProfile {
                user_id,
                session_guid,
                client_profile,
            } => {
                w.put_xplatform(user_id);
                w.put_uuid(session_guid);
                w.put_json(client_profile);
            }
            Message::UpdateProfileSuccess { user_id } => {
                w.put_xplatform(user_id);
            }
            Message::UpdateProfileFailure {
                user_id,
                status,
                message,
            } => {
                w.put_xplatform(user_id);
                w.put_u64(*status);
                w.put_str16(message);
            }
            Message::UserServerProfileUpdateRequest { user_id, delta } => {
                w.put_xplatform(user_id);
                w.put_json(delta);
            }
            Message::UserServerProfileUpdateSuccess { user_id } => {
                w.put_xplatform(user_id);
            }
            Message::ChannelInfoRequest => {}
            Message::ChannelInfoResponse { channel_info } => {
                w.put_json(channel_info);
            }
            Message::DocumentRequestv2 { language, doc_type } => {
                w.put_str16(language);
                w.put_str16(doc_type);
            }
            Message::DocumentSuccess {
                document_symbol,
                document,
            } => {
                w.put_symbol(*document_symbol);
                w.put_json(document);
            }
            Message::DocumentFailure { message } => {
                w.put_str16(message);
            }
            Message::RemoteLogSetv3 {
                user_id,
                log_level,
                logs,
            } => {
                w.put_xplatform(user_id);
                w.put_u64(*log_level);
                w.put_u32(logs.len() as u32);
                for line in logs {
                    w.put_str32(line);
                }
            }
            Message::ConfigRequest {
                config_type,
                identifier,
            } => {
                w.put_str16(config_type);
                w.put_str16(identifier);
            }
            Message::ConfigSuccess {
                type_symbol,
                id_symbol,
                resource,
            } => {
                w.put_symbol(*type_symbol);
                w.put_symbol(*id_symbol);
                w.put_json(resource);
            }
            Message::ConfigFailure {
                type_symbol,
                id_symbol,
                error_info,
            } => {
                w.put_symbol(*type_symbol);
                w.put_symbol(*id_symbol);
                w.put_json(error_info);
            }
            Message::ReconcileIAP {
                user_id,
                session_guid,
            } => {
                w.put_xplatform(user_id);
                w.put_uuid(session_guid);
            }
            Message::ReconcileIAPResult { user_id, iap_data } => {
                w.put_xplatform(user_id);
                w.put_json(iap_data);
            }
            Message::RegisterGameServer {
                server_id,
                internal_address,
                external_address,
                port,
                region_symbol,
                version_lock,
            } => {
                w.put_u64(*server_id);
                w.put_ipv4(internal_address);
                w.put_ipv4(external_address);
                w.put_u16(*port);
                w.put_symbol(*region_symbol);
                w.put_symbol(*version_lock);
            }
            Message::RegistrationSuccess {
                server_id,
                external_address,
            } => {
                w.put_u64(*server_id);
                w.put_ipv4(external_address);
            }
            Message::RegistrationFailure { reason } => {
                w.put_str16(reason);
            }
            Message::LobbySessionNew {
                session_guid,
                server_id,
                level_symbol,
                game_mode_symbol,
                session_settings,
            } => {
                w.put_uuid(session_guid);
                w.put_u64(*server_id);
                w.put_symbol(*level_symbol);
                w.put_symbol(*game_mode_symbol);
                w.put_json(session_settings);
            }
            Message::LobbySessionStartedv4 { session_guid } => {
                w.put_uuid(session_guid);
            }
            Message::LobbySessionEnded { session_guid } => {
                w.put_uuid(session_guid);
            }
            Message::LobbyPlayerJoined {
                session_guid,
                user_id,
            } => {
                w.put_uuid(session_guid);
                w.put_xplatform(user_id);
            }
            Message::LobbyPlayerLeft {
                session_guid,
                user_id,
            } => {
                w.put_uuid(session_guid);
                w.put_xplatform(user_id);
            }
            Message::GameServerRegistrationUpdate {
                is_public,
                capacity,
            } => {
                w.put_u8(*is_public as u8);
                w.put_u32(*capacity);
            }
            Message::LobbyCreateSessionRequestv9 {
                user_id,
                session_guid,
                region_symbol,
                version_lock,
                level_symbol,
                game_mode_symbol,
                team_index,
                server_pings,
                session_settings,
            } => {
                w.put_xplatform(user_id);
                w.put_uuid(session_guid);
                w.put_symbol(*region_symbol);
                w.put_symbol(*version_lock);
                w.put_symbol(*level_symbol);
                w.put_symbol(*game_mode_symbol);
                w.put_i16(*team_index);
                put_server_pings(&mut w, server_pings);
                w.put_json(session_settings);
            }
            Message::LobbyFindSessionRequestv11 {
                user_id,
                session_guid,
                region_symbol,
                version_lock,
                level_symbol,
                game_mode_symbol,
                team_index,
                server_pings,
            } => {
                w.put_xplatform(user_id);
                w.put_uuid(session_guid);
                w.put_symbol(*region_symbol);
                w.put_symbol(*version_lock);
                w.put_symbol(*level_symbol);
                w.put_symbol(*game_mode_symbol);
                w.put_i16(*team_index);
                put_server_pings(&mut w, server_pings);
            }
            Message::LobbyJoinSessionRequestv7 {
                user_id,
                session_guid,
                lobby_session_guid,
                team_index,
            } => {
                w.put_xplatform(user_id);
                w.put_uuid(session_guid);
                w.put_uuid(lobby_session_guid);
                w.put_i16(*team_index);
            }
            Message::LobbySessionSuccessv5 {
                session_guid,
                endpoint_address,
                endpoint_port,
                team_index,
            } => {
                w.put_uuid(session_guid);
                w.put_ipv4(endpoint_address);
                w.put_u16(*endpoint_port);
                w.put_i16(*team_index);
            }
            Message::LobbySessionFailure { reason } => {
                w.put_str16(reason);
            }
            Message::Unknown(raw) => {
                return bytes::BytesMut::from(&raw.body[..]);
            }
        }
        w.finish()
    }

    /// Interprets a raw envelope into a typed message.
    ///
    /// A symbol outside the vocabulary yields [`Message::Unknown`]; a known
    /// symbol with a malformed body is a framing error.
    pub fn decode(raw: RawMessage) -> Result<Message, FramingError> {
        match DECODERS.get(&raw.type_symbol) {
            Some(decode) => {
                let mut reader = BodyReader::new(&raw.body);
                decode(&mut reader)
            }
            None => Ok(Message::Unknown(raw)),
        }
    }
}

fn put_server_pings(w: &mut BodyWriter, pings: &[ServerPing]) {
    w.put_u32(pings.len() as u32);
    for ping in pings {
        w.put_u64(ping.server_id);
        w.put_u32(ping.ping_ms);
    }
}

fn get_server_pings(r: &mut BodyReader) -> Result<Vec<ServerPing>, FramingError> {
    let count = r.get_u32("server_pings count")?;
    let mut pings = Vec::with_capacity(count.min(1024) as usize);
    for _ in 0..count {
        pings.push(ServerPing {
            server_id: r.get_u64("server_pings server_id")?,
            ping_ms: r.get_u32("server_pings ping_ms")?,
        });
    }
    Ok(pings)
}

static DECODERS: Lazy<HashMap<Symbol, DecodeFn>> = Lazy::new(|| {
    let mut table: HashMap<Symbol, DecodeFn> = HashMap::new();
    let mut add = |name: &str, decode: DecodeFn| {
        table.insert(Symbol::of(name), decode);
    };

    add("LoginRequest", |r| {
        Ok(Message::LoginRequest {
            user_id: r.get_xplatform("user_id")?,
            client_session_guid: r.get_uuid("client_session_guid")?,
            account_info: r.get_json("account_info")?,
        })
    });
    add("LoginSuccess", |r| {
        Ok(Message::LoginSuccess {
            user_id: r.get_xplatform("user_id")?,
            session_guid: r.get_uuid("session_guid")?,
        })
    });
    add("LoginFailure", |r| {
        Ok(Message::LoginFailure {
            user_id: r.get_xplatform("user_id")?,
            status: r.get_u64("status")?,
            reason: r.get_str16("reason")?,
        })
    });
    add("TcpConnectionUnrequireEvent", |r| {
        r.get_u8("unused")?;
        Ok(Message::TcpConnectionUnrequireEvent)
    });
    add("LoginSettings", |r| {
        Ok(Message::LoginSettings {
            settings: r.get_json("settings")?,
        })
    });
    add("LoggedInUserProfileRequest", |r| {
        Ok(Message::LoggedInUserProfileRequest {
            user_id: r.get_xplatform("user_id")?,
            session_guid: r.get_uuid("session_guid")?,
        })
    });
    add("LoggedInUserProfileSuccess", |r| {
        Ok(Message::LoggedInUserProfileSuccess {
            user_id: r.get_xplatform("user_id")?,
            profile: r.get_json("profile")?,
        })
    });
    add("LoggedInUserProfileFailure", |r| {
        Ok(Message::LoggedInUserProfileFailure {
            user_id: r.get_xplatform("user_id")?,
            status: r.get_u64("status")?,
            message: r.get_str16("message")?,
        })
    });
    add("OtherUserProfileRequest", |r| {
        Ok(Message::OtherUserProfileRequest {
            user_id: r.get_xplatform("user_id")?,
        })
    });
    add("OtherUserProfileSuccess", |r| {
        Ok(Message::OtherUserProfileSuccess {
            user_id: r.get_xplatform("user_id")?,
            profile: r.get_json("profile")?,
        })
    });
    add("OtherUserProfileFailure", |r| {
        Ok(Message::OtherUserProfileFailure {
            user_id: r.get_xplatform("user_id")?,
            status: r.get_u64("status")?,
            message: r.get_str16("message")?,
        })
    });
    add("UpdateProfile", |r| {
        Ok(Message::UpdateProfile {
            user_id: r.get_xplatform("user_id")?,
            session_guid: r.get_uuid("session_guid")?,
            client_profile: r.get_json("client_profile")?,
        })
    });
    add("UpdateProfileSuccess", |r| {
        Ok(Message::UpdateProfileSuccess {
            user_id: r.get_xplatform("user_id")?,
        })
    });
    add("UpdateProfileFailure", |r| {
        Ok(Message::UpdateProfileFailure {
            user_id: r.get_xplatform("user_id")?,
            status: r.get_u64("status")?,
            message: r.get_str16("message")?,
        })
    });
    add("UserServerProfileUpdateRequest", |r| {
        Ok(Message::UserServerProfileUpdateRequest {
            user_id: r.get_xplatform("user_id")?,
            delta: r.get_json("delta")?,
        })
    });
    add("UserServerProfileUpdateSuccess", |r| {
        Ok(Message::UserServerProfileUpdateSuccess {
            user_id: r.get_xplatform("user_id")?,
        })
    });
    add("ChannelInfoRequest", |_| Ok(Message::ChannelInfoRequest));
    add("ChannelInfoResponse", |r| {
        Ok(Message::ChannelInfoResponse {
            channel_info: r.get_json("channel_info")?,
        })
    });
    add("DocumentRequestv2", |r| {
        Ok(Message::DocumentRequestv2 {
            language: r.get_str16("language")?,
            doc_type: r.get_str16("doc_type")?,
        })
    });
    add("DocumentSuccess", |r| {
        Ok(Message::DocumentSuccess {
            document_symbol: r.get_symbol("document_symbol")?,
            document: r.get_json("document")?,
        })
    });
    add("DocumentFailure", |r| {
        Ok(Message::DocumentFailure {
            message: r.get_str16("message")?,
        })
    });
    add("RemoteLogSetv3", |r| {
        let user_id = r.get_xplatform("user_id")?;
        let log_level = r.get_u64("log_level")?;
        let count = r.get_u32("logs count")?;
        let mut logs = Vec::with_capacity(count.min(1024) as usize);
        for _ in 0..count {
            logs.push(r.get_str32("log line")?);
        }
        Ok(Message::RemoteLogSetv3 {
            user_id,
            log_level,
            logs,
        })
    });
    add("ConfigRequest", |r| {
        Ok(Message::ConfigRequest {
            config_type: r.get_str16("config_type")?,
            identifier: r.get_str16("identifier")?,
        })
    });
    add("ConfigSuccess", |r| {
        Ok(Message::ConfigSuccess {
            type_symbol: r.get_symbol("type_symbol")?,
            id_symbol: r.get_symbol("id_symbol")?,
            resource: r.get_json("resource")?,
        })
    });
    add("ConfigFailure", |r| {
        Ok(Message::ConfigFailure {
            type_symbol: r.get_symbol("type_symbol")?,
            id_symbol: r.get_symbol("id_symbol")?,
            error_info: r.get_json("error_info")?,
        })
    });
    add("ReconcileIAP", |r| {
        Ok(Message::ReconcileIAP {
            user_id: r.get_xplatform("user_id")?,
            session_guid: r.get_uuid("session_guid")?,
        })
    });
    add("ReconcileIAPResult", |r| {
        Ok(Message::ReconcileIAPResult {
            user_id: r.get_xplatform("user_id")?,
            iap_data: r.get_json("iap_data")?,
        })
    });
    add("RegisterGameServer", |r| {
        Ok(Message::RegisterGameServer {
            server_id: r.get_u64("server_id")?,
            internal_address: r.get_ipv4("internal_address")?,
            external_address: r.get_ipv4("external_address")?,
            port: r.get_u16("port")?,
            region_symbol: r.get_symbol("region_symbol")?,
            version_lock: r.get_symbol("version_lock")?,
        })
    });
    add("RegistrationSuccess", |r| {
        Ok(Message::RegistrationSuccess {
            server_id: r.get_u64("server_id")?,
            external_address: r.get_ipv4("external_address")?,
        })
    });
    add("RegistrationFailure", |r| {
        Ok(Message::RegistrationFailure {
            reason: r.get_str16("reason")?,
        })
    });
    add("LobbySessionNew", |r| {
        Ok(Message::LobbySessionNew {
            session_guid: r.get_uuid("session_guid")?,
            server_id: r.get_u64("server_id")?,
            level_symbol: r.get_symbol("level_symbol")?,
            game_mode_symbol: r.get_symbol("game_mode_symbol")?,
            session_settings: r.get_json("session_settings")?,
        })
    });
    add("LobbySessionStartedv4", |r| {
        Ok(Message::LobbySessionStartedv4 {
            session_guid: r.get_uuid("session_guid")?,
        })
    });
    add("LobbySessionEnded", |r| {
        Ok(Message::LobbySessionEnded {
            session_guid: r.get_uuid("session_guid")?,
        })
    });
    add("LobbyPlayerJoined", |r| {
        Ok(Message::LobbyPlayerJoined {
            session_guid: r.get_uuid("session_guid")?,
            user_id: r.get_xplatform("user_id")?,
        })
    });
    add("LobbyPlayerLeft", |r| {
        Ok(Message::LobbyPlayerLeft {
            session_guid: r.get_uuid("session_guid")?,
            user_id: r.get_xplatform("user_id")?,
        })
    });
    add("GameServerRegistrationUpdate", |r| {
        Ok(Message::GameServerRegistrationUpdate {
            is_public: r.get_u8("is_public")? != 0,
            capacity: r.get_u32("capacity")?,
        })
    });
    add("LobbyCreateSessionRequestv9", |r| {
        Ok(Message::LobbyCreateSessionRequestv9 {
            user_id: r.get_xplatform("user_id")?,
            session_guid: r.get_uuid("session_guid")?,
            region_symbol: r.get_symbol("region_symbol")?,
            version_lock: r.get_symbol("version_lock")?,
            level_symbol: r.get_symbol("level_symbol")?,
            game_mode_symbol: r.get_symbol("game_mode_symbol")?,
            team_index: r.get_i16("team_index")?,
            server_pings: get_server_pings(r)?,
            session_settings: r.get_json("session_settings")?,
        })
    });
    add("LobbyFindSessionRequestv11", |r| {
        Ok(Message::LobbyFindSessionRequestv11 {
            user_id: r.get_xplatform("user_id")?,
            session_guid: r.get_uuid("session_guid")?,
            region_symbol: r.get_symbol("region_symbol")?,
            version_lock: r.get_symbol("version_lock")?,
            level_symbol: r.get_symbol("level_symbol")?,
            game_mode_symbol: r.get_symbol("game_mode_symbol")?,
            team_index: r.get_i16("team_index")?,
            server_pings: get_server_pings(r)?,
        })
    });
    add("LobbyJoinSessionRequestv7", |r| {
        Ok(Message::LobbyJoinSessionRequestv7 {
            user_id: r.get_xplatform("user_id")?,
            session_guid: r.get_uuid("session_guid")?,
            lobby_session_guid: r.get_uuid("lobby_session_guid")?,
            team_index: r.get_i16("team_index")?,
        })
    });
    add("LobbySessionSuccessv5", |r| {
        Ok(Message::LobbySessionSuccessv5 {
            session_guid: r.get_uuid("session_guid")?,
            endpoint_address: r.get_ipv4("endpoint_address")?,
            endpoint_port: r.get_u16("endpoint_port")?,
            team_index: r.get_i16("team_index")?,
        })
    });
    add("LobbySessionFailure", |r| {
        Ok(Message::LobbySessionFailure {
            reason: r.get_str16("reason")?,
        })
    });

    table
});

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{decode_packet, encode_packet, DEFAULT_MAX_MESSAGE_BYTES};
    use serde_json::json;

    fn round_trip(message: Message) {
        let packet = encode_packet(std::slice::from_ref(&message));
        let decoded = decode_packet(&packet, DEFAULT_MAX_MESSAGE_BYTES).unwrap();
        assert_eq!(decoded, vec![message]);
    }

    #[test]
    fn test_login_messages_round_trip() {
        let user = XPlatformId::new(7, 12345);
        round_trip(Message::LoginRequest {
            user_id: user,
            client_session_guid: Uuid::new_v4(),
            account_info: json!({"displayname": "PlayerOne"}),
        });
        round_trip(Message::LoginSuccess {
            user_id: user,
            session_guid: Uuid::new_v4(),
        });
        round_trip(Message::LoginFailure {
            user_id: user,
            status: 403,
            reason: "Banned".into(),
        });
        round_trip(Message::TcpConnectionUnrequireEvent);
        round_trip(Message::LoginSettings {
            settings: json!({"iap_unlocked": false}),
        });
        round_trip(Message::LoggedInUserProfileRequest {
            user_id: user,
            session_guid: Uuid::new_v4(),
        });
        round_trip(Message::UpdateProfile {
            user_id: user,
            session_guid: Uuid::new_v4(),
            client_profile: json!({"xplatform_id": "OVR-12345"}),
        });
        round_trip(Message::UserServerProfileUpdateRequest {
            user_id: user,
            delta: json!({"stats": {"wins": 3}}),
        });
        round_trip(Message::RemoteLogSetv3 {
            user_id: user,
            log_level: 2,
            logs: vec!["{\"message\":\"a\"}".into(), "{\"message\":\"b\"}".into()],
        });
        round_trip(Message::DocumentRequestv2 {
            language: "en".into(),
            doc_type: "eula".into(),
        });
    }

    #[test]
    fn test_serverdb_messages_round_trip() {
        round_trip(Message::RegisterGameServer {
            server_id: 42,
            internal_address: Ipv4Addr::new(10, 0, 0, 5),
            external_address: Ipv4Addr::new(203, 0, 113, 7),
            port: 6792,
            region_symbol: Symbol::of("us-east"),
            version_lock: Symbol::of("v1.0"),
        });
        round_trip(Message::RegistrationSuccess {
            server_id: 42,
            external_address: Ipv4Addr::new(203, 0, 113, 7),
        });
        round_trip(Message::RegistrationFailure {
            reason: "endpoint validation failed".into(),
        });
        round_trip(Message::LobbySessionNew {
            session_guid: Uuid::new_v4(),
            server_id: 42,
            level_symbol: Symbol::of("arena"),
            game_mode_symbol: Symbol::of("social"),
            session_settings: json!({}),
        });
        round_trip(Message::LobbyPlayerJoined {
            session_guid: Uuid::new_v4(),
            user_id: XPlatformId::new(1, 9),
        });
        round_trip(Message::GameServerRegistrationUpdate {
            is_public: true,
            capacity: 12,
        });
    }

    #[test]
    fn test_matching_messages_round_trip() {
        round_trip(Message::LobbyCreateSessionRequestv9 {
            user_id: XPlatformId::new(7, 5),
            session_guid: Uuid::new_v4(),
            region_symbol: Symbol::of("us-east"),
            version_lock: Symbol::of("v1.0"),
            level_symbol: Symbol::of("arena"),
            game_mode_symbol: Symbol::of("social"),
            team_index: 1,
            server_pings: vec![
                ServerPing {
                    server_id: 1,
                    ping_ms: 30,
                },
                ServerPing {
                    server_id: 2,
                    ping_ms: 85,
                },
            ],
            session_settings: json!({"private": false}),
        });
        round_trip(Message::LobbySessionSuccessv5 {
            session_guid: Uuid::new_v4(),
            endpoint_address: Ipv4Addr::new(203, 0, 113, 7),
            endpoint_port: 6792,
            team_index: 0,
        });
        round_trip(Message::LobbySessionFailure {
            reason: "no servers".into(),
        });
    }

    #[test]
    fn test_unknown_symbol_survives_decode() {
        let raw = RawMessage {
            type_symbol: Symbol::of("SomeFutureMessage"),
            body: bytes::Bytes::from_static(&[1, 2, 3]),
        };
        let decoded = Message::decode(raw.clone()).unwrap();
        assert_eq!(decoded, Message::Unknown(raw));
        // Unknown messages re-encode to their original bytes.
        round_trip(decoded);
    }

    #[test]
    fn test_known_symbol_with_short_body_is_an_error() {
        let raw = RawMessage {
            type_symbol: Symbol::of("LoginSuccess"),
            body: bytes::Bytes::from_static(&[0; 4]),
        };
        assert!(Message::decode(raw).is_err());
    }

    #[test]
    fn test_type_symbols_are_distinct() {
        let names = [
            "LoginRequest",
            "LoginSuccess",
            "ConfigRequest",
            "RegisterGameServer",
            "LobbyCreateSessionRequestv9",
            "LobbyFindSessionRequestv11",
            "LobbyJoinSessionRequestv7",
        ];
        let symbols: std::collections::HashSet<_> = names.iter().map(|n| Symbol::of(n)).collect();
        assert_eq!(symbols.len(), names.len());
    }
}
