//! Daemon lifecycle: open the store, health check, metrics, sync server

use anyhow::{Context, Result};
use blksync_core::config::BlksyncConfig;
use blksync_storage::BlockStore;
use prometheus_client::registry::Registry;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::metrics::{HealthState, Metrics};
use crate::server::{self, AppState};

pub async fn run(config: BlksyncConfig) -> Result<()> {
    info!("daemon starting");

    let store = BlockStore::open(&config.server, &config.codec)
        .await
        .with_context(|| {
            format!(
                "opening block store at {}",
                config.server.dictionary.display()
            )
        })?;

    match blksync_storage::check_health(store.operator()).await {
        Ok(()) => info!(
            root = %config.server.dictionary.display(),
            level = config.codec.level,
            "block store: ready"
        ),
        Err(e) => warn!(root = %config.server.dictionary.display(), "block store: {e}"),
    }

    // Counters are always kept; they are only exported when a metrics
    // listener is configured
    let mut registry = Registry::default();
    let metrics = Arc::new(Metrics::new(&mut registry));
    if let Some(addr) = config.daemon.metrics_addr.clone() {
        let state = HealthState {
            registry: Arc::new(registry),
            store: store.clone(),
        };
        tokio::spawn(async move {
            if let Err(e) = crate::metrics::serve(addr, state).await {
                error!("metrics server failed: {e}");
            }
        });
    }

    let bind_addr = config.server.bind_addr()?;
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding sync endpoint {bind_addr}"))?;

    info!(addr = %bind_addr, "sync: listening on /stream");

    server::serve(listener, AppState { store, metrics }, server::shutdown_signal()).await?;

    info!("daemon stopped");
    Ok(())
}
