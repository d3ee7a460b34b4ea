mod broadcast;
mod config;
mod core;
mod reputation;
mod rpc;
mod server;
mod signals;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use crate::broadcast::AlertBroadcaster;
use crate::config::Config;
use crate::core::pipeline::{MonitoringService, PipelineSettings};
use crate::reputation::{ReputationSnapshot, ReputationStore};
use crate::rpc::EthRpc;
use crate::rpc::explorer::ExplorerClient;
use crate::rpc::feed::{FeedConfig, NodeFeed};
use crate::server::AppState;
use crate::signals::RiskEngine;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("txguard=info".parse()?))
        .init();

    tracing::info!("txguard starting...");

    // Load configuration
    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.toml".to_string());
    let config = Config::load(&config_path);
    tracing::info!("Config: {:?}", config);

    let lookup_timeout = Duration::from_secs(config.monitor.lookup_timeout_secs);

    // Reputation snapshot, optionally refreshed from a list file
    let static_list = config.reputation.list();
    let reputation = Arc::new(ReputationStore::new(ReputationSnapshot::from_list(&static_list)));
    let shutdown = CancellationToken::new();
    let refresher = config.reputation.list_path.as_ref().map(|path| {
        crate::reputation::spawn_refresh(
            reputation.clone(),
            static_list.clone(),
            PathBuf::from(path),
            Duration::from_secs(config.reputation.refresh_interval_secs.max(1)),
            shutdown.clone(),
        )
    });

    // Node RPC and block explorer
    let mut rpc = EthRpc::new(&config.node.rpc_url, lookup_timeout);
    if let (Some(user), Some(pass)) = (&config.node.rpc_user, &config.node.rpc_password) {
        rpc = rpc.with_basic_auth(user, pass);
    }
    let rpc = Arc::new(rpc);
    let explorer = Arc::new(ExplorerClient::new(
        &config.explorer.api_url,
        config.explorer.chain_id,
        config.explorer.api_key.clone(),
        lookup_timeout,
    ));
    tracing::info!(node = %rpc.url(), explorer = %config.explorer.api_url, "Collaborators configured");

    let engine = Arc::new(RiskEngine::new(
        reputation.clone(),
        explorer,
        rpc.clone(),
        rpc.clone(),
        rpc.clone(),
        lookup_timeout,
    ));

    let feed = Arc::new(NodeFeed::new(
        rpc,
        FeedConfig {
            poll_interval: Duration::from_millis(config.node.poll_interval_ms.max(1)),
            max_failures: config.node.max_poll_failures.max(1),
            ..FeedConfig::default()
        },
    ));

    let broadcaster = Arc::new(AlertBroadcaster::new("Connected to txguard risk alerts"));
    let monitor = Arc::new(MonitoringService::new(
        engine.clone(),
        feed,
        broadcaster.clone(),
        PipelineSettings::from(&config.monitor),
    ));
    monitor.start();

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    let state = AppState {
        engine,
        monitor: monitor.clone(),
        broadcaster,
        heartbeat: Duration::from_secs(config.server.heartbeat_interval_secs.max(1)),
        idle_timeout: Duration::from_secs(config.server.idle_timeout_secs),
    };
    let server = tokio::spawn(server::serve(listener, state, shutdown.clone()));

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
    }
    tracing::info!("Shutdown requested");

    monitor.stop().await;
    shutdown.cancel();
    match server.await {
        Ok(Err(e)) => tracing::error!("HTTP server error: {e}"),
        Err(e) => tracing::error!("HTTP server task failed: {e}"),
        Ok(Ok(())) => {}
    }
    if let Some(refresher) = refresher {
        let _ = refresher.await;
    }

    tracing::info!("txguard stopped");
    Ok(())
}
