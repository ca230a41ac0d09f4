//! # Axum Helpers
//!
//! Shared plumbing for the Axum services in this workspace.
//!
//! ## Modules
//!
//! - **[`server`]**: Router setup, health/metrics endpoints, graceful shutdown
//! - **[`http`]**: HTTP middleware (CORS, security headers)
//! - **[`errors`]**: Structured error responses with error codes
//! - **[`extractors`]**: Custom extractors (UUID path)
//!
//! ## Quick Start
//!
//! ```ignore
//! use axum::Router;
//! use axum_helpers::server::{create_app, create_router};
//! use core_config::server::ServerConfig;
//! use utoipa::OpenApi;
//!
//! #[derive(OpenApi)]
//! #[openapi(paths())]
//! struct ApiDoc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let api_routes = Router::new(); // Add your routes
//!     let router = create_router::<ApiDoc>(api_routes).await?;
//!
//!     let config = ServerConfig::default();
//!     create_app(router, &config).await?;
//!     Ok(())
//! }
//! ```

pub mod errors;
pub mod extractors;
pub mod http;
pub mod server;

pub use server::{
    HealthCheckFuture, HealthResponse, ReadyResponse, ShutdownCoordinator, create_app,
    create_production_app, create_router, health_router, init_metrics, metrics_router,
    render_metrics, run_health_checks, shutdown_signal,
};

pub use http::{create_cors_layer, parse_allowed_origins, security_headers};

pub use errors::{AppError, ErrorCode, ErrorResponse};

pub use extractors::UuidPath;
