use std::sync::Arc;

use anyhow::Result;
use mien_core::{OnnxExtractor, OnnxFaceDetector};
use mien_store::Store;
use miend::config::Config;
use miend::{api, AppState};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("miend starting");

    let config = Config::from_env();
    std::fs::create_dir_all(config.captured_dir())?;
    std::fs::create_dir_all(config.pending_dir())?;

    let store = Store::open(&config.db_path())?;
    tracing::info!(path = %config.db_path().display(), captures = store.count()?, "store opened");

    // Fail fast: a daemon without its models cannot resolve anything.
    let detector = OnnxFaceDetector::load(&config.detector_model_path())?;
    let extractor = OnnxExtractor::load(&config.embedder_model_path())?;

    if config.api_key.is_none() {
        tracing::warn!("MIEN_API_KEY not set; /upload-face accepts unauthenticated requests");
    }

    let state = Arc::new(AppState {
        store,
        detector: Arc::new(detector),
        extractor: Arc::new(extractor),
        matcher: config.match_policy.matcher(),
        match_threshold: config.match_threshold,
        api_key: config.api_key.clone(),
        origin_default: config.origin_default.clone(),
        captured_dir: config.captured_dir(),
        pending_dir: config.pending_dir(),
        extract_timeout: std::time::Duration::from_secs(config.extract_timeout_secs),
        match_gate: tokio::sync::Mutex::new(()),
    });

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "miend ready");

    axum::serve(listener, api::routes::router(state).into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("miend shutting down");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
