//! UUID path parameter extractor with automatic validation.

use crate::errors::AppError;
use axum::{
    extract::{FromRequestParts, Path},
    http::request::Parts,
    response::{IntoResponse, Response},
};
use uuid::Uuid;

/// Extractor for a single UUID path parameter.
///
/// Rejects malformed ids with the shared 400 [`crate::ErrorResponse`] body
/// before the handler runs.
///
/// # Example
/// ```ignore
/// use axum::{Router, routing::get};
/// use axum_helpers::extractors::UuidPath;
///
/// async fn stream(UuidPath(task_id): UuidPath) -> String {
///     format!("task {}", task_id)
/// }
///
/// let app = Router::new().route("/stream/{task_id}", get(stream));
/// ```
#[derive(Debug, Clone, Copy)]
pub struct UuidPath(pub Uuid);

impl<S> FromRequestParts<S> for UuidPath
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(raw) = Path::<String>::from_request_parts(parts, state)
            .await
            .map_err(IntoResponse::into_response)?;

        Uuid::parse_str(raw.trim())
            .map(UuidPath)
            .map_err(|_| AppError::BadRequest(format!("Invalid UUID: {}", raw)).into_response())
    }
}
