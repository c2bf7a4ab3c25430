//! Fanout Node - real-time event fan-out server.

use anyhow::Context;
use clap::Parser;
use fanout_core::{HeartbeatMonitor, Hub};
use fanout_node::api::{create_router, AppState};
use fanout_node::auth::ChannelAuthorizer;
use fanout_node::config::NodeConfig;
use fanout_node::health::HealthState;
use fanout_node::observability::{init_logging, LogFormat};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Fanout Node - WebSocket and SSE event fan-out
#[derive(Parser, Debug)]
#[command(name = "fanout-node")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address (overrides the config file)
    #[arg(long)]
    listen_addr: Option<SocketAddr>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Log format (pretty, json)
    #[arg(long)]
    log_format: Option<String>,

    /// Node ID used to tag bus traffic
    #[arg(long)]
    node_id: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => NodeConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => NodeConfig::default(),
    };
    if let Some(addr) = args.listen_addr {
        config.server.listen_addr = addr;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    if let Some(format) = args.log_format.as_deref() {
        config.logging.format = LogFormat::parse(format);
    }
    if args.node_id.is_some() {
        config.node_id = args.node_id;
    }
    config.validate().context("invalid configuration")?;

    init_logging(&config.logging.level, config.logging.format);

    let hub_config = config.hub_config();
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        node_id = %hub_config.node_id,
        listen_addr = %config.server.listen_addr,
        max_clients = hub_config.max_clients,
        auth = config.auth.enabled,
        "Starting fanout node"
    );

    let hub = Arc::new(Hub::new(hub_config));
    let health = HealthState::new(hub.reader());
    let state = AppState::new(hub.clone(), ChannelAuthorizer::from_config(&config.auth));

    let shutdown = CancellationToken::new();
    let monitor = tokio::spawn(HeartbeatMonitor::new(hub.clone()).run(shutdown.clone()));

    let listener = tokio::net::TcpListener::bind(config.server.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.server.listen_addr))?;

    let app = create_router(state, health.clone());
    health.set_ready(true);
    tracing::info!(addr = %config.server.listen_addr, "Node is ready. Press Ctrl+C to stop.");

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown signal received");
            health.set_ready(false);
            signal.cancel();
        })
        .await
        .context("server error")?;

    shutdown.cancel();
    if let Err(e) = monitor.await {
        tracing::warn!(error = %e, "Heartbeat monitor task failed");
    }
    tracing::info!("Fanout node stopped");
    Ok(())
}
