//! Application-specific readiness handler with real dependency checks.

use crate::state::AppState;
use axum::{
    Json,
    extract::State,
    response::{IntoResponse, Response},
};
use axum_helpers::server::{HealthCheckFuture, ReadyResponse, run_health_checks};
use serde::Serialize;

#[derive(Serialize)]
struct ReadyReport {
    #[serde(flatten)]
    checks: ReadyResponse,
    /// Tasks registered and not yet streamed to completion
    live_tasks: usize,
}

/// Readiness check endpoint: the temp directory must be writable.
///
/// This uses the generic `run_health_checks` utility from axum-helpers.
pub async fn ready_handler(State(state): State<AppState>) -> Response {
    let storage = state.vision.storage();
    let checks: Vec<(&str, HealthCheckFuture<'_>)> = vec![(
        "temp_dir",
        Box::pin(async {
            storage
                .probe()
                .await
                .map_err(|e| format!("Temp directory {} not writable: {}", storage.dir().display(), e))
        }),
    )];

    let checks = run_health_checks(checks).await;
    let status = checks.status_code();
    let report = ReadyReport {
        checks,
        live_tasks: state.vision.registry().len(),
    };

    (status, Json(report)).into_response()
}
