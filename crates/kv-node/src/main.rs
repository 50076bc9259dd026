//! kv-node - coordinator daemon for the replicated key-value store
//!
//! Opens local storage, restores whatever identity and roots were
//! persisted last run, accepts inbound sync connections, and periodically
//! pulls from whatever bootstrap peers were configured.

use clap::Parser;
use kv_node::config::Config;
use kv_node::Coordinator;
use kv_store::adapter::SledAdapter;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();
    let default_level = if config.verbose { "kv_node=debug" } else { "kv_node=info" };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(default_level.parse().unwrap()))
        .init();

    if let Err(e) = config.validate() {
        error!("invalid configuration: {}", e);
        return ExitCode::FAILURE;
    }

    info!("kv-node v{} starting on {}", env!("CARGO_PKG_VERSION"), config.listen);

    let adapter = match SledAdapter::open(&config.data_dir, "kv-node") {
        Ok(a) => Arc::new(a),
        Err(e) => {
            error!("failed to open storage at {}: {}", config.data_dir.display(), e);
            return ExitCode::FAILURE;
        }
    };

    let coordinator = match Coordinator::open(adapter) {
        Ok(c) => Arc::new(c),
        Err(e) => {
            error!("failed to initialize coordinator: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let (shutdown_tx, _) = broadcast::channel(1);

    for addr in &config.bootstrap {
        match coordinator.connect(*addr).await {
            Ok(peer) => info!(peer = %hex::encode(peer), %addr, "connected to bootstrap peer"),
            Err(e) => error!(%addr, error = %e, "failed to connect to bootstrap peer"),
        }
    }

    let sync_coordinator = coordinator.clone();
    let sync_interval = Duration::from_secs(config.sync_interval_secs);
    let mut sync_shutdown = shutdown_tx.subscribe();
    let sync_handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sync_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = sync_coordinator.sync_all().await {
                        error!(error = %e, "periodic sync_all failed");
                    }
                }
                _ = sync_shutdown.recv() => break,
            }
        }
    });

    tokio::spawn({
        let shutdown_tx = shutdown_tx.clone();
        async move {
            tokio::signal::ctrl_c().await.ok();
            info!("received shutdown signal");
            let _ = shutdown_tx.send(());
        }
    });

    let run_result = coordinator.run(config.listen, shutdown_tx.subscribe()).await;
    sync_handle.abort();

    if let Err(e) = coordinator.close().await {
        error!(error = %e, "error closing coordinator");
    }

    if let Err(e) = run_result {
        error!(error = %e, "sync listener error");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
