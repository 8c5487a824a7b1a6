// Main entry point for the text removal service

use text_removal::{
    api::build_router,
    core::{types::AppState, Config},
    orchestration::PipelineOrchestrator,
    utils::Metrics,
};

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Arc::new(Config::new().context("Failed to load configuration")?);

    // Initialize logging
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::new(format!(
        "text_removal={},ort=off",
        match config.log_level() {
            tracing::Level::TRACE => "trace",
            tracing::Level::DEBUG => "debug",
            tracing::Level::INFO => "info",
            tracing::Level::WARN => "warn",
            tracing::Level::ERROR => "error",
        }
    ));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("=== TEXT REMOVAL SERVICE ===");
    info!(
        "Config: canvas={} mag={} thresholds={}/{}/{} dilation={} workspace={}",
        config.detection.canvas_size,
        config.detection.mag_ratio,
        config.detection.text_threshold,
        config.detection.low_text,
        config.detection.link_threshold,
        config.dilation_radius(),
        config.workspace_dir().display()
    );

    std::fs::create_dir_all(config.workspace_dir()).with_context(|| {
        format!(
            "Failed to create workspace directory {}",
            config.workspace_dir().display()
        )
    })?;

    // Initialize metrics
    let metrics = Metrics::new();

    // Model loading blocks, keep it off the async workers
    info!("Initializing pipeline orchestrator...");
    let orchestrator = {
        let config = config.clone();
        let metrics = metrics.clone();
        tokio::task::spawn_blocking(move || PipelineOrchestrator::new(config, metrics)).await??
    };
    let state = AppState {
        config: config.clone(),
        orchestrator: Arc::new(orchestrator),
        metrics,
    };

    let app = build_router(state);

    let addr = format!("{}:{}", config.server_host(), config.server_port());
    info!("{}", "=".repeat(70));
    info!("Server starting on http://{}", addr);
    info!("{}", "-".repeat(70));
    info!("Endpoints:");
    info!("  GET  /         - Root endpoint");
    info!("  GET  /health   - Health check");
    info!("  GET  /metrics  - Prometheus metrics");
    info!("  GET  /stats    - Detailed statistics");
    info!("  POST /upload   - Remove text from an image (multipart field \"image\")");
    info!("{}", "=".repeat(70));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
