use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    components(
        schemas(axum_helpers::ErrorResponse)
    ),
    info(
        title = "Vision API",
        version = "0.1.0",
        description = "Upload images, get a description and keywords for each from a vision model, streamed as server-sent events"
    ),
    servers(
        (url = "/api", description = "API base path")
    )
)]
struct BaseApiDoc;

/// OpenAPI documentation for the vision API
///
/// The domain routes are mounted at the API root, so their document is
/// merged rather than nested under a prefix.
pub struct ApiDoc;

impl OpenApi for ApiDoc {
    fn openapi() -> utoipa::openapi::OpenApi {
        let mut doc = BaseApiDoc::openapi();
        doc.merge(domain_vision::ApiDoc::openapi());
        doc
    }
}
