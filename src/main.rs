//! Relay entry point: CLI, logging bootstrap, wiring, signal handling.

use anyhow::{Context, Result};
use arena_relay::config::RelayConfig;
use arena_relay::events::{event_channel, RelayEvent};
use arena_relay::registry::{EndpointValidator, GameServerRegistry};
use arena_relay::resources::ResourceStore;
use arena_relay::server::RelayServer;
use arena_relay::services::{
    ConfigService, DocumentService, LoginService, MatchingService, ServerDbService, Service,
    TransactionService,
};
use arena_relay::session_cache::SessionCache;
use arena_relay::storage::{FilesystemStorage, Storage};
use arena_relay::symbols::SymbolCache;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "arena-relay")]
#[command(about = "Central relay for VR arena clients and dedicated game servers")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "relay.toml")]
    config: PathBuf,

    /// Bind address override (e.g. 0.0.0.0:6789)
    #[arg(short, long)]
    bind: Option<String>,

    /// Storage root override
    #[arg(long)]
    storage_root: Option<String>,

    /// Log level override (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Output logs in JSON format
    #[arg(long)]
    json_logs: bool,
}

fn setup_logging(level: &str, json_format: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);

    if json_format {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

/// Waits for SIGINT or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt()).expect("SIGINT handler");
        let mut sigterm = signal(SignalKind::terminate()).expect("SIGTERM handler");

        tokio::select! {
            _ = sigint.recv() => info!("Received SIGINT"),
            _ = sigterm.recv() => info!("Received SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await.expect("Ctrl+C handler");
        info!("Received Ctrl+C");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = RelayConfig::load_from_file(&cli.config)
        .await
        .map_err(|e| anyhow::anyhow!("failed to load {}: {e}", cli.config.display()))?;

    // CLI overrides win over the file.
    if let Some(bind) = cli.bind {
        config.server.bind_address = bind;
    }
    if let Some(root) = cli.storage_root {
        config.storage.root = root;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    if cli.json_logs {
        config.logging.json_format = true;
    }
    config.validate().map_err(|e| anyhow::anyhow!(e))?;

    setup_logging(&config.logging.level, config.logging.json_format);
    info!("🔧 Starting arena relay");

    let storage = Arc::new(FilesystemStorage::new(
        &config.storage.root,
        !config.storage.disable_cache,
    ));
    storage.open().await.context("failed to open storage")?;
    let resources = ResourceStore::new(storage);

    let symbols = match &config.symbols.cache_path {
        Some(path) => Arc::new(
            SymbolCache::load_from_file(path)
                .await
                .with_context(|| format!("failed to load symbol cache {}", path.display()))?,
        ),
        None => {
            warn!("⚠️  No symbol cache configured; region and document lookups will be empty");
            Arc::new(SymbolCache::new())
        }
    };

    let (events, _keepalive) = event_channel();
    let sessions = Arc::new(SessionCache::new(
        Duration::from_secs(config.login.session_ttl_secs),
        Duration::from_secs(config.login.session_disconnected_timeout_secs),
    ));

    let validator = config
        .serverdb
        .validate_endpoint
        .then(|| EndpointValidator::new(Duration::from_millis(config.serverdb.validate_timeout_ms)));
    let registry = Arc::new(GameServerRegistry::new(
        symbols.clone(),
        validator,
        events.clone(),
    ));

    let services: Vec<Arc<dyn Service>> = vec![
        Arc::new(LoginService::new(
            resources.clone(),
            symbols.clone(),
            sessions.clone(),
            events.clone(),
        )),
        Arc::new(ConfigService::new(
            resources.clone(),
            symbols.clone(),
            events.clone(),
        )),
        Arc::new(DocumentService::new(
            resources.clone(),
            symbols.clone(),
            events.clone(),
        )),
        Arc::new(MatchingService::new(
            registry.clone(),
            sessions.clone(),
            config.matching.policy,
            config.matching.force_into_any_session,
            events.clone(),
        )),
        Arc::new(ServerDbService::new(registry.clone(), events.clone())),
        Arc::new(TransactionService::new(events.clone())),
    ];
    for service in &services {
        info!("🧩 Service {} bound to {}", service.name(), service.path());
    }

    // Trace every relay event; observers must never block the emitters.
    let event_monitor = tokio::spawn({
        let mut receiver = events.subscribe();
        async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => match &event {
                        RelayEvent::ServerStarted { .. }
                        | RelayEvent::ServerStopped
                        | RelayEvent::GameServerRegistered { .. }
                        | RelayEvent::GameServerUnregistered { .. }
                        | RelayEvent::GameServerRegistrationFailure { .. } => {
                            info!("Event: {event:?}");
                        }
                        _ => debug!("Event: {event:?}"),
                    },
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("Event monitor lagged; {missed} events dropped");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    });

    let server = RelayServer::new(
        Arc::new(config),
        services,
        sessions,
        registry,
        events,
    );
    server.run(shutdown_signal()).await?;

    event_monitor.abort();
    info!("✅ Relay exited cleanly");
    Ok(())
}
