use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod error;
mod orchestrator;
mod prepare;
mod registry;
mod server;
mod store;
mod txmanager;
mod verifier;
mod watcher;

use config::RelayerConfig;
use server::RelayerState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relayer=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("starting shielded-payment relayer");

    dotenvy::dotenv().ok();
    let config = RelayerConfig::from_env()?;

    info!(rpc_url = %config.rpc_url, host = %config.host, port = config.port, "configuration loaded");

    let state = Arc::new(RelayerState::new(config).await?);

    let watcher_store = state.orchestrator.store.clone();
    let watcher_registry = state.orchestrator.registry.clone();
    let ws_url = state.config.ws_url.clone();
    let rpc_url = state.config.rpc_url.clone();
    let program_id = state.config.program_id;
    tokio::spawn(async move {
        let watcher = watcher::EventWatcher::new(ws_url, rpc_url, program_id, watcher_store, watcher_registry);
        watcher.run().await;
    });

    server::run(state).await?;
    Ok(())
}
