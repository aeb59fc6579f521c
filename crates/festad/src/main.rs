use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing_subscriber::EnvFilter;

use festad::api::{self, AppContext};
use festad::config::Config;
use festad::engine;
use festad::store::GuestRoster;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("festad starting");

    let config = Config::from_env();
    config
        .ensure_dirs()
        .context("failed to create data directories")?;

    let roster = GuestRoster::load(config.roster_path());
    tracing::info!(
        guests = roster.len(),
        roster = %config.roster_path().display(),
        "guest roster loaded"
    );

    let engine = engine::spawn(
        &config.scrfd_model_path(),
        &config.arcface_model_path(),
        config.detector_confidence,
    )
    .context("failed to start inference engine")?;

    let port = config.port;
    let ctx = AppContext {
        config: Arc::new(config),
        roster: Arc::new(RwLock::new(roster)),
        source: Arc::new(engine),
    };

    let app = api::build_router(ctx);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, "festad ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("festad shutting down");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
