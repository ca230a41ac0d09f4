use axum_helpers::server::{create_production_app, health_router, init_metrics, metrics_router};
use core_config::tracing::{init_tracing, install_color_eyre};
use domain_vision::{OpenAiCompatibleGateway, TaskRegistry, VisionService};
use eyre::WrapErr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

mod api;
mod config;
mod openapi;
mod state;

use config::Config;
use state::AppState;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    // Install color-eyre first for colored error output (before any fallible operations)
    install_color_eyre();

    // Load configuration from environment variables
    let config = Config::from_env()?;

    // Initialize tracing with ErrorLayer for span trace capture
    init_tracing(&config.environment);

    init_metrics().wrap_err("Failed to install Prometheus recorder")?;

    info!(
        model = %config.vision.model.model,
        endpoint = %config.vision.model.completions_url(),
        temp_dir = %config.vision.temp_dir.display(),
        "Configuring vision pipeline"
    );

    let gateway = OpenAiCompatibleGateway::new(config.vision.model.clone())
        .wrap_err("Failed to build model client")?;
    let vision = Arc::new(VisionService::new(
        Arc::new(TaskRegistry::new()),
        Arc::new(gateway),
        &config.vision,
    ));
    vision
        .storage()
        .ensure_dir()
        .await
        .wrap_err_with(|| format!("Cannot create temp dir {}", config.vision.temp_dir.display()))?;

    let state = AppState { config, vision };

    // Build router with API routes (pass reference, not ownership!)
    let api_routes = api::routes(&state);

    // create_router adds docs/middleware to our composed routes
    let router = axum_helpers::create_router::<openapi::ApiDoc>(api_routes).await?;

    // - /health: liveness check with app name/version
    // - /ready: temp dir check plus live task count
    // - /metrics: Prometheus scrape endpoint
    let app = router
        .merge(health_router(state.config.app.clone()))
        .merge(api::ready_router(state.clone()))
        .merge(metrics_router());

    info!("Starting vision API with production-ready shutdown (30s timeout)");

    // Cleanup cancels running batches so open streams can drain
    let vision = Arc::clone(&state.vision);
    create_production_app(
        app,
        &state.config.server,
        Duration::from_secs(30),
        async move {
            info!("Shutting down: cancelling live tasks and removing temp files");
            vision.shutdown().await;
        },
    )
    .await
    .map_err(|e| eyre::eyre!("Server error: {}", e))?;

    info!("Vision API shutdown complete");
    Ok(())
}
