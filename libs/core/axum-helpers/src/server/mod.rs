//! Server infrastructure module.
//!
//! This module provides:
//! - Application setup with OpenAPI documentation
//! - Health and readiness endpoints
//! - Prometheus metrics endpoint
//! - Graceful shutdown coordination
//!
//! # Example
//!
//! ```ignore
//! use axum_helpers::server::{create_production_app, create_router, health_router};
//! use core_config::app_info;
//!
//! let router = create_router::<ApiDoc>(api_routes).await?;
//! let app = router.merge(health_router(app_info!()));
//! create_production_app(app, &config.server, Duration::from_secs(30), cleanup).await?;
//! ```

pub mod app;
pub mod health;
pub mod metrics;
pub mod shutdown;

pub use app::{create_app, create_production_app, create_router};
pub use health::{
    HealthCheckFuture, HealthResponse, ReadyResponse, health_router, run_health_checks,
};
pub use metrics::{init_metrics, metrics_router, render_metrics};
pub use shutdown::{ShutdownCoordinator, shutdown_signal};
