use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use market_node::{
    api::{self, AppState},
    ledger::{EthereumLedger, Ledger},
    KeyReleaseService, NodeConfig,
};
use std::path::PathBuf;
use std::sync::Arc;

/// Market Node Arguments
#[derive(Parser)]
#[clap(name = "market-node")]
#[clap(about = "Data marketplace key custody node")]
struct Args {
    /// Path to node configuration file
    #[clap(long, default_value = "config/node.yaml")]
    config_path: PathBuf,

    /// Override the configured listen address
    #[clap(long)]
    listen_addr: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    info!("Starting market node...");
    info!("Config path: {:?}", args.config_path);
    if !args.config_path.exists() {
        info!("Config file not found, using defaults and environment");
    }

    let mut config = NodeConfig::load(Some(&args.config_path)).context("failed to load configuration")?;
    if let Some(listen_addr) = args.listen_addr {
        config.api.listen_addr = listen_addr;
        config.validate()?;
    }

    // Key store
    let store = config.storage.open_store().context("failed to open key store")?;
    info!(
        "Key store ready ({} backend, {:?})",
        store.backend_name(),
        config.storage.key_dir
    );

    // Ledger
    let ledger = Arc::new(
        EthereumLedger::new(&config.ledger.rpc_url, &config.ledger.market_address)
            .context("failed to configure ledger")?,
    );
    if ledger.is_connected().await {
        info!("Connected to ledger at {}", config.ledger.rpc_url);
    } else {
        warn!(
            "Ledger at {} is not reachable yet; key requests will fail until it is",
            config.ledger.rpc_url
        );
    }

    let service = Arc::new(KeyReleaseService::new(store, ledger));
    let mut state = AppState::new(service, config.api.max_upload_bytes);
    match config.api.admin_token.clone() {
        Some(token) => state = state.with_admin_token(token),
        None => info!("Admin API disabled (no api.admin_token configured)"),
    }

    let addr = config.listen_addr()?;
    info!("Starting API server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    api::serve(listener, state, shutdown_signal()).await?;

    info!("Market node stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
