//! The session server: one listener, five services.
//!
//! Incoming connections are HTTP requests whose path selects a service; the
//! connection upgrades to a WebSocket and every binary frame feeds the shared
//! packet decoder. The server owns peer lifecycles end to end: attach on
//! upgrade, detach (which releases registrations and sessions) before the
//! transport close completes, and a bounded-grace shutdown that closes every
//! peer and clears the session cache.
//!
//! The same listener exposes the read-only admin API (`/api/status`,
//! `/api/gameservers`) guarded by the shared apikey mechanism.

use crate::config::RelayConfig;
use crate::events::{emit, EventSender, RelayEvent};
use crate::peer::{Peer, PeerCommand};
use crate::protocol::{Message, PacketDecoder};
use crate::registry::GameServerRegistry;
use crate::services::serverdb::SERVERDB_SERVICE;
use crate::services::Service;
use crate::session_cache::SessionCache;
use anyhow::{Context, Result};
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Query};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

const SESSION_PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// A peer that cannot absorb a packet within this window is closed.
const PEER_SEND_TIMEOUT: Duration = Duration::from_secs(30);

struct AppState {
    config: Arc<RelayConfig>,
    events: EventSender,
    sessions: Arc<SessionCache>,
    registry: Arc<GameServerRegistry>,
    services: Vec<Arc<dyn Service>>,
    started_at: Instant,
}

impl AppState {
    fn total_peer_count(&self) -> usize {
        self.services.iter().map(|s| s.peers().len()).sum()
    }

    /// Admin view: aggregate stats plus per-service peer counts.
    async fn status(&self) -> serde_json::Value {
        let peers: serde_json::Map<String, serde_json::Value> = self
            .services
            .iter()
            .map(|s| (s.name().to_string(), json!(s.peers().len())))
            .collect();
        json!({
            "uptime_secs": self.started_at.elapsed().as_secs(),
            "peers": peers,
            "registered_gameservers": self.registry.len().await,
            "active_login_sessions": self.sessions.len(),
        })
    }
}

pub struct RelayServer {
    state: Arc<AppState>,
}

impl RelayServer {
    pub fn new(
        config: Arc<RelayConfig>,
        services: Vec<Arc<dyn Service>>,
        sessions: Arc<SessionCache>,
        registry: Arc<GameServerRegistry>,
        events: EventSender,
    ) -> Self {
        Self {
            state: Arc::new(AppState {
                config,
                events,
                sessions,
                registry,
                services,
                started_at: Instant::now(),
            }),
        }
    }

    /// Builds the router binding every service path plus the admin API.
    pub fn router(&self) -> Router {
        let mut router = Router::new();

        for service in &self.state.services {
            let state = self.state.clone();
            let service = service.clone();
            router = router.route(
                service.path(),
                get(
                    move |ws: WebSocketUpgrade,
                          ConnectInfo(addr): ConnectInfo<SocketAddr>,
                          Query(params): Query<HashMap<String, String>>| {
                        service_upgrade(state.clone(), service.clone(), ws, addr, params)
                    },
                ),
            );
        }

        let state = self.state.clone();
        router = router.route(
            "/api/status",
            get(move |Query(params): Query<HashMap<String, String>>| {
                let state = state.clone();
                async move {
                    if !admin_authorized(&state, &params) {
                        return StatusCode::UNAUTHORIZED.into_response();
                    }
                    Json(state.status().await).into_response()
                }
            }),
        );

        let state = self.state.clone();
        router = router.route(
            "/api/gameservers",
            get(move |Query(params): Query<HashMap<String, String>>| {
                let state = state.clone();
                async move {
                    if !admin_authorized(&state, &params) {
                        return StatusCode::UNAUTHORIZED.into_response();
                    }
                    Json(state.registry.snapshot_all().await).into_response()
                }
            }),
        );

        router.layer(TraceLayer::new_for_http())
    }

    /// Runs until the shutdown future resolves, then winds everything down.
    pub async fn run(
        self,
        shutdown: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<()> {
        let bind_address: SocketAddr = self
            .state
            .config
            .server
            .bind_address
            .parse()
            .context("invalid bind address")?;

        let listener = tokio::net::TcpListener::bind(bind_address)
            .await
            .with_context(|| format!("failed to bind {bind_address}"))?;
        let bound = listener.local_addr()?;

        info!("🚀 Relay listening on {bound}");
        emit(&self.state.events, RelayEvent::ServerStarted { bind_address: bound });

        // Periodic TTL sweep of the login session cache.
        let purge_task = tokio::spawn({
            let sessions = self.state.sessions.clone();
            async move {
                let mut tick = tokio::time::interval(SESSION_PURGE_INTERVAL);
                loop {
                    tick.tick().await;
                    sessions.purge_expired();
                }
            }
        });

        let app = self
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .context("server error")?;

        purge_task.abort();
        self.shutdown().await;
        Ok(())
    }

    async fn shutdown(&self) {
        info!("🛑 Relay shutting down");
        self.state.sessions.clear();
        for service in &self.state.services {
            for peer in service.peers().iter() {
                peer.close();
            }
        }

        // Bounded grace for in-flight handlers and peer writer tasks.
        let grace = Duration::from_secs(self.state.config.server.shutdown_grace_secs);
        tokio::time::sleep(grace).await;

        emit(&self.state.events, RelayEvent::ServerStopped);
        info!("👋 Relay stopped");
    }
}

/// Whether this connection may reach the service, per the apikey policy.
fn connection_authorized(
    state: &AppState,
    service: &Arc<dyn Service>,
    params: &HashMap<String, String>,
) -> bool {
    if service.name() == SERVERDB_SERVICE {
        if let Some(expected) = &state.config.server.api.serverdb_api_key {
            return params.get("apikey").map(String::as_str) == Some(expected.as_str());
        }
    }
    true
}

fn admin_authorized(state: &AppState, params: &HashMap<String, String>) -> bool {
    match &state.config.server.api.admin_api_key {
        Some(expected) => params.get("apikey").map(String::as_str) == Some(expected.as_str()),
        None => true,
    }
}

async fn service_upgrade(
    state: Arc<AppState>,
    service: Arc<dyn Service>,
    ws: WebSocketUpgrade,
    addr: SocketAddr,
    params: HashMap<String, String>,
) -> Response {
    let authorized = connection_authorized(&state, &service, &params)
        && state.total_peer_count() < state.config.server.max_connections;
    emit(
        &state.events,
        RelayEvent::AuthorizationResult {
            endpoint: addr,
            authorized,
        },
    );
    if !authorized {
        debug!("Rejecting {addr} on {}", service.path());
        return StatusCode::UNAUTHORIZED.into_response();
    }

    ws.on_upgrade(move |socket| peer_connection(state, service, socket, addr))
}

/// One task per connection: owns the peer from attach to detach.
async fn peer_connection(
    state: Arc<AppState>,
    service: Arc<dyn Service>,
    socket: WebSocket,
    addr: SocketAddr,
) {
    let (peer, mut outbound) = Peer::new(addr);
    debug!("🔌 {addr} connected to {}", service.name());
    service.attach_peer(peer.clone()).await;

    let (mut sink, mut stream) = socket.split();

    // Writer half: drains the peer's send queue in order. A send that
    // cannot complete within the timeout closes the peer.
    let writer = tokio::spawn(async move {
        while let Some(command) = outbound.recv().await {
            match command {
                PeerCommand::Packet(bytes) => {
                    let send = sink.send(WsMessage::Binary(bytes.into()));
                    match tokio::time::timeout(PEER_SEND_TIMEOUT, send).await {
                        Ok(Ok(())) => {}
                        Ok(Err(_)) => break,
                        Err(_) => {
                            warn!("Send to {addr} timed out; dropping the connection");
                            break;
                        }
                    }
                }
                PeerCommand::Close => {
                    let _ = sink.send(WsMessage::Close(None)).await;
                    break;
                }
            }
        }
    });

    let mut decoder = PacketDecoder::new(state.config.server.max_message_bytes);
    'connection: while let Some(frame) = stream.next().await {
        let data = match frame {
            Ok(WsMessage::Binary(data)) => data,
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => continue,
            Err(err) => {
                debug!("Transport error from {addr}: {err}");
                break;
            }
        };

        decoder.extend(&data);
        let mut messages = Vec::new();
        loop {
            match decoder.try_next() {
                Ok(Some(raw)) => match Message::decode(raw) {
                    Ok(message) => messages.push(message),
                    Err(err) => {
                        // Malformed framing: close without a reply.
                        warn!("Closing {addr}: {err}");
                        break 'connection;
                    }
                },
                Ok(None) => break,
                Err(err) => {
                    warn!("Closing {addr}: {err}");
                    break 'connection;
                }
            }
        }

        if !messages.is_empty() {
            service.handle_packet(&peer, messages).await;
        }
    }

    // Detach first: registrations and session state are released before the
    // peer's close completes.
    service.detach_peer(&peer).await;
    peer.close();
    writer.abort();
    debug!("🔌 {addr} disconnected from {}", service.name());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RelayConfig;
    use crate::events::event_channel;
    use crate::services::TransactionService;
    use crate::symbols::SymbolCache;

    fn state_with_key(
        serverdb_api_key: Option<&str>,
        admin_api_key: Option<&str>,
    ) -> (Arc<AppState>, Arc<dyn Service>) {
        let mut config = RelayConfig::default();
        config.server.api.serverdb_api_key = serverdb_api_key.map(str::to_owned);
        config.server.api.admin_api_key = admin_api_key.map(str::to_owned);

        let (events, _rx) = event_channel();
        let registry = Arc::new(GameServerRegistry::new(
            Arc::new(SymbolCache::new()),
            None,
            events.clone(),
        ));
        let sessions = Arc::new(SessionCache::new(
            Duration::from_secs(10),
            Duration::from_secs(5),
        ));
        let service: Arc<dyn Service> = Arc::new(TransactionService::new(events.clone()));
        let state = Arc::new(AppState {
            config: Arc::new(config),
            events,
            sessions,
            registry,
            services: vec![service.clone()],
            started_at: Instant::now(),
        });
        (state, service)
    }

    struct FakeServerDb(dashmap::DashMap<uuid::Uuid, Arc<Peer>>, EventSender);

    #[async_trait::async_trait]
    impl Service for FakeServerDb {
        fn name(&self) -> &'static str {
            SERVERDB_SERVICE
        }
        fn path(&self) -> &'static str {
            "/serverdb"
        }
        fn peers(&self) -> &dashmap::DashMap<uuid::Uuid, Arc<Peer>> {
            &self.0
        }
        fn events(&self) -> &EventSender {
            &self.1
        }
        async fn handle_message(
            &self,
            _peer: &Arc<Peer>,
            _message: Message,
        ) -> Result<(), crate::error::ServiceError> {
            Ok(())
        }
    }

    #[test]
    fn test_serverdb_apikey_is_enforced() {
        let (state, _svc) = state_with_key(Some("secret"), None);
        let (events, _rx) = event_channel();
        let serverdb: Arc<dyn Service> = Arc::new(FakeServerDb(dashmap::DashMap::new(), events));

        let mut params = HashMap::new();
        assert!(!connection_authorized(&state, &serverdb, &params));

        params.insert("apikey".to_string(), "wrong".to_string());
        assert!(!connection_authorized(&state, &serverdb, &params));

        params.insert("apikey".to_string(), "secret".to_string());
        assert!(connection_authorized(&state, &serverdb, &params));
    }

    #[test]
    fn test_non_serverdb_paths_ignore_the_serverdb_key() {
        let (state, service) = state_with_key(Some("secret"), None);
        assert!(connection_authorized(&state, &service, &HashMap::new()));
    }

    #[test]
    fn test_admin_apikey() {
        let (state, _svc) = state_with_key(None, Some("admin-secret"));
        assert!(!admin_authorized(&state, &HashMap::new()));

        let mut params = HashMap::new();
        params.insert("apikey".to_string(), "admin-secret".to_string());
        assert!(admin_authorized(&state, &params));

        let (open_state, _svc) = state_with_key(None, None);
        assert!(admin_authorized(&open_state, &HashMap::new()));
    }

    #[tokio::test]
    async fn test_status_reports_counts() {
        let (state, service) = state_with_key(None, None);
        let (peer, _rx) = Peer::new("127.0.0.1:6000".parse().unwrap());
        service.attach_peer(peer).await;

        let status = state.status().await;
        assert_eq!(status["peers"]["transaction"], 1);
        assert_eq!(status["registered_gameservers"], 0);
    }

    #[tokio::test]
    async fn test_run_binds_and_shuts_down() {
        let mut config = RelayConfig::default();
        config.server.bind_address = "127.0.0.1:0".to_string();
        config.server.shutdown_grace_secs = 0;

        let (events, _keep) = event_channel();
        let mut event_rx = events.subscribe();
        let registry = Arc::new(GameServerRegistry::new(
            Arc::new(SymbolCache::new()),
            None,
            events.clone(),
        ));
        let sessions = Arc::new(SessionCache::new(
            Duration::from_secs(10),
            Duration::from_secs(5),
        ));
        let services: Vec<Arc<dyn Service>> = vec![Arc::new(TransactionService::new(events.clone()))];
        let server = RelayServer::new(
            Arc::new(config),
            services,
            sessions.clone(),
            registry,
            events,
        );

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(server.run(async {
            let _ = stop_rx.await;
        }));

        // The started event carries the actual bound address.
        let bound = loop {
            match event_rx.recv().await.unwrap() {
                RelayEvent::ServerStarted { bind_address } => break bind_address,
                _ => continue,
            }
        };
        assert!(tokio::net::TcpStream::connect(bound).await.is_ok());

        stop_tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }
}
