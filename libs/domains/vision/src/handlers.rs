//! HTTP handlers for the vision domain: multipart upload and SSE progress stream

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
};
use axum_helpers::{
    UuidPath,
    errors::responses::{
        BadRequestUuidResponse, InternalServerErrorResponse, MultipartErrorResponse,
        PayloadTooLargeResponse,
    },
};
use futures::{Stream, StreamExt};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use utoipa::{OpenApi, ToSchema};

use crate::error::VisionResult;
use crate::models::{
    EventKind, ImageDescription, IncomingFile, TaskEvent, UploadRejection, UploadResponse,
    UploadedImage,
};
use crate::service::VisionService;
use crate::stream::task_events;

/// Shared state for the vision routes
#[derive(Clone)]
pub struct VisionState {
    pub service: Arc<VisionService>,
    /// How long a stream waits for its task; `None` waits forever
    pub stream_attach_timeout: Option<Duration>,
}

impl VisionState {
    pub fn new(service: Arc<VisionService>, stream_attach_timeout: Option<Duration>) -> Self {
        Self {
            service,
            stream_attach_timeout,
        }
    }
}

/// Multipart body of `POST /upload`: one or more file parts.
#[derive(ToSchema)]
#[allow(dead_code)]
pub struct UploadForm {
    /// Image files; parts without an `image/*` content type are skipped
    #[schema(value_type = Vec<String>)]
    files: Vec<Vec<u8>>,
}

/// OpenAPI documentation for the vision API
#[derive(OpenApi)]
#[openapi(
    paths(upload_handler, stream_handler),
    components(
        schemas(
            UploadForm,
            UploadResponse,
            UploadedImage,
            UploadRejection,
            TaskEvent,
            EventKind,
            ImageDescription,
        ),
        responses(
            BadRequestUuidResponse,
            MultipartErrorResponse,
            PayloadTooLargeResponse,
            InternalServerErrorResponse
        )
    ),
    tags((name = "vision", description = "Image description and keyword extraction"))
)]
pub struct ApiDoc;

/// Create the vision router. `max_body_bytes` bounds the multipart upload.
pub fn router(state: VisionState, max_body_bytes: usize) -> Router {
    Router::new()
        .route(
            "/upload",
            post(upload_handler).layer(DefaultBodyLimit::max(max_body_bytes)),
        )
        .route("/stream/{task_id}", get(stream_handler))
        .with_state(state)
}

/// Upload images and start describing them
#[utoipa::path(
    post,
    path = "/upload",
    tag = "vision",
    request_body(content = UploadForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Task created", body = UploadResponse),
        (status = 400, description = "No valid image files uploaded", body = UploadRejection),
        (status = 413, response = PayloadTooLargeResponse),
        (status = 500, response = InternalServerErrorResponse)
    )
)]
async fn upload_handler(
    State(state): State<VisionState>,
    mut multipart: Multipart,
) -> VisionResult<Json<UploadResponse>> {
    let mut files = Vec::new();

    while let Some(field) = multipart.next_field().await? {
        let Some(filename) = field.file_name().map(str::to_string) else {
            debug!(field = ?field.name(), "Ignoring non-file form field");
            continue;
        };
        let content_type = field.content_type().map(str::to_string);
        let bytes = field.bytes().await?;
        files.push(IncomingFile::new(filename, content_type, bytes));
    }

    let response = state.service.submit_batch(files).await?;
    Ok(Json(response))
}

/// Stream a task's progress as server-sent events
///
/// Each event carries `event: <kind>`, `id: <image_id>` for image events, and
/// the payload as `data`. The stream closes after `end`.
#[utoipa::path(
    get,
    path = "/stream/{task_id}",
    tag = "vision",
    params(("task_id" = Uuid, Path, description = "Task id returned by the upload")),
    responses(
        (status = 200, description = "SSE stream of task events", content_type = "text/event-stream", body = String),
        (status = 400, response = BadRequestUuidResponse)
    )
)]
async fn stream_handler(
    State(state): State<VisionState>,
    UuidPath(task_id): UuidPath,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let registry = Arc::clone(state.service.registry());
    let events = task_events(registry, task_id, state.stream_attach_timeout)
        .map(|event| Ok(to_sse_event(&event)));

    Sse::new(events).keep_alive(KeepAlive::default())
}

/// SSE framing of one task event.
pub fn to_sse_event(event: &TaskEvent) -> Event {
    let sse = Event::default().event(event.kind.as_ref());
    let sse = match event.image_id {
        Some(image_id) => sse.id(image_id.to_string()),
        None => sse,
    };
    sse.data(event.data.replace("\r\n", "\n").replace('\r', "\n"))
}
