use anyhow::{Context, Result};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod render;
mod routes;
mod storage;

use config::Config;
use routes::AppState;
use storage::Storage;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("personidd starting");

    let config = Config::from_env();
    tracing::info!(
        bind = %config.bind,
        model_dir = %config.model_dir.display(),
        static_dir = %config.static_dir.display(),
        threshold = config.similarity_threshold,
        policy = %config.match_policy,
        output_mode = %config.output_mode,
        "configuration loaded"
    );

    let storage = Storage::new(
        config.static_dir.clone(),
        config.upload_naming,
        config.output_mode,
        config.retain_uploads,
    );
    storage.prepare().context("failed to prepare static directories")?;

    let (engine, info) = engine::load_engine(&config).context("failed to start identification engine")?;

    let state = Arc::new(AppState { engine, storage, info });
    let app = routes::router(state, config.max_upload_bytes);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;

    tracing::info!(addr = %config.bind, "personidd ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("personidd shutting down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
}
