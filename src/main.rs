use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use vision_annotator::config::Config;
use vision_annotator::server::{router, AppState};

const DEFAULT_LOG_FILTER: &str = "vision_annotator=info,tower_http=info";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let config = Config::parse();
    let state = AppState::from_config(&config).context("invalid analyzer configuration")?;
    let app = router(Arc::new(state));

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;

    tracing::info!("Server running on http://{}", config.listen_addr);
    tracing::info!(
        "Analyzer timeout {}s, upload limit {} bytes, thumbnail size {}",
        config.analyzer_timeout_secs,
        config.max_upload_bytes,
        config
            .thumbnail_size
            .map_or_else(|| "full resolution".to_string(), |n| n.to_string())
    );

    axum::serve(listener, app).await?;
    Ok(())
}
