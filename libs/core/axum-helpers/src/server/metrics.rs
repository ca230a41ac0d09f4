//! Prometheus exporter shared by HTTP services.
//!
//! Domain crates record through the `metrics` facade; this module installs
//! the recorder and serves the rendered text.

use axum::{Router, http::header, response::IntoResponse, routing::get};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use tracing::info;

static PROMETHEUS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install the Prometheus recorder.
///
/// Call this once at startup. Subsequent calls are no-ops.
pub fn init_metrics() -> Result<(), BuildError> {
    PROMETHEUS_HANDLE.get_or_try_init(|| {
        let handle = PrometheusBuilder::new().install_recorder()?;
        info!("Prometheus metrics initialized");
        Ok::<_, BuildError>(handle)
    })?;
    Ok(())
}

/// Get the Prometheus handle for rendering metrics
pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

/// Render metrics in Prometheus text format; empty before [`init_metrics`].
pub fn render_metrics() -> String {
    prometheus_handle().map(|h| h.render()).unwrap_or_default()
}

async fn metrics_handler() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        render_metrics(),
    )
}

/// Router exposing `GET /metrics`.
pub fn metrics_router() -> Router {
    Router::new().route("/metrics", get(metrics_handler))
}
