//! Cluster metrics consumer
//!
//! Mirrors orchestrator object identity into a relational store, ingests
//! raw collector batches over HTTP, serves a short-horizon live view, and
//! periodically persists samples to a columnar analytical store.

use anyhow::{Context, Result};
use consumer_lib::{
    api::{self, AppState},
    flush::FlushWorker,
    ConsumerMetrics, HealthMonitor, IdentityStore, MetricsStore, ResourceSyncer, RingWindow,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting metrics consumer");

    let config = config::ConsumerConfig::load()?;
    let data_dir = Path::new(&config.data_dir);
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create data dir {}", data_dir.display()))?;
    info!(data_dir = %data_dir.display(), "Using data directory");

    let identity = Arc::new(IdentityStore::open(data_dir.join("meta.db"))?);
    let metrics_store = Arc::new(MetricsStore::open(data_dir.join("metrics.duckdb"))?);

    let health = HealthMonitor::new();
    let metrics = ConsumerMetrics::new();

    // Orchestrator credentials come from KUBECONFIG, or the in-cluster
    // service account when KUBERNETES_SERVICE_HOST is set.
    let client = kube::Client::try_default()
        .await
        .context("failed to build orchestrator client")?;

    let (shutdown_tx, _) = broadcast::channel(1);

    let syncer = Arc::new(ResourceSyncer::new(identity.clone()));
    tokio::spawn(
        syncer
            .clone()
            .run(client, health.clone(), shutdown_tx.subscribe()),
    );

    let ring = Arc::new(RingWindow::new(config.ring_capacity));

    let flusher = FlushWorker::new(
        ring.clone(),
        metrics_store.clone(),
        Duration::from_secs(config.flush_interval_secs),
        health.clone(),
        metrics.clone(),
    );
    let flush_handle = tokio::spawn(flusher.run(shutdown_tx.subscribe()));

    let state = AppState {
        identity,
        ring,
        health: health.clone(),
        metrics,
    };
    let app = api::router(state, syncer);
    let server_handle = tokio::spawn(api::serve(config.http_port, app, shutdown_tx.subscribe()));

    health.set_ready(true);

    wait_for_signal().await?;
    info!("Shutting down");
    health.set_ready(false);
    let _ = shutdown_tx.send(());

    // Let the flush worker run its final drain before exit.
    let _ = flush_handle.await;
    let _ = server_handle.await;

    Ok(())
}

async fn wait_for_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm =
        signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("failed to listen for SIGINT")?,
        _ = sigterm.recv() => {}
    }
    Ok(())
}
