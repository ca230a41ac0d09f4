use axum::{
    Json,
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use axum_helpers::AppError;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

/// Result type for upload and stream operations
pub type VisionResult<T> = Result<T, VisionError>;

/// Result type for model backend calls
pub type ModelResult<T> = Result<T, ModelError>;

/// Result type for task registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

#[derive(Debug, Error)]
pub enum VisionError {
    /// Upload carried no file parts at all
    #[error("No files received.")]
    NoFiles,

    /// No file part declared an image content type, or none could be stored
    #[error("No valid image files uploaded.")]
    NoValidImages,

    #[error("Failed to read upload: {0}")]
    Upload(#[from] MultipartError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Failure of a single model call. Surfaced to the stream as an `error` event.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("model backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("provider error: {0}")]
    Provider(String),

    #[error("malformed stream chunk: {0}")]
    MalformedChunk(String),

    #[error("model returned an empty response")]
    EmptyResponse,
}

impl From<reqwest::Error> for ModelError {
    fn from(err: reqwest::Error) -> Self {
        ModelError::Transport(err.to_string())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Task {0} is already registered")]
    DuplicateTask(Uuid),

    #[error("Unknown task: {0}")]
    NotFound(Uuid),

    #[error("Task {0} already has an active stream")]
    AlreadyAttached(Uuid),
}

impl From<RegistryError> for AppError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(_) => AppError::NotFound(err.to_string()),
            RegistryError::AlreadyAttached(_) => AppError::Conflict(err.to_string()),
            RegistryError::DuplicateTask(_) => AppError::InternalServerError(err.to_string()),
        }
    }
}

impl From<VisionError> for AppError {
    fn from(err: VisionError) -> Self {
        match err {
            VisionError::NoFiles | VisionError::NoValidImages => {
                AppError::BadRequest(err.to_string())
            }
            VisionError::Upload(e) => AppError::Multipart(e),
            VisionError::Registry(e) => e.into(),
        }
    }
}

impl IntoResponse for VisionError {
    fn into_response(self) -> Response {
        match self {
            // Upload validation keeps the `{"error": "..."}` body browser clients read.
            VisionError::NoFiles | VisionError::NoValidImages => {
                tracing::info!("Upload rejected: {}", self);
                let body = Json(json!({ "error": self.to_string() }));
                (StatusCode::BAD_REQUEST, body).into_response()
            }
            other => AppError::from(other).into_response(),
        }
    }
}
