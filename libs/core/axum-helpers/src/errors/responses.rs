//! Reusable OpenAPI response types for consistent API documentation.

use super::ErrorResponse;
#[allow(unused_imports)]
use serde_json::json;
use utoipa::ToResponse;

#[derive(ToResponse)]
#[response(
    description = "Internal Server Error",
    content_type = "application/json",
    example = json!({
        "code": 1005,
        "error": "INTERNAL_ERROR",
        "message": "An internal server error occurred"
    })
)]
pub struct InternalServerErrorResponse(pub ErrorResponse);

#[derive(ToResponse)]
#[response(
    description = "Bad Request - Invalid UUID",
    content_type = "application/json",
    example = json!({
        "code": 1001,
        "error": "VALIDATION_ERROR",
        "message": "Invalid UUID: not-a-uuid"
    })
)]
pub struct BadRequestUuidResponse(pub ErrorResponse);

#[derive(ToResponse)]
#[response(
    description = "Bad Request - Unreadable multipart body",
    content_type = "application/json",
    example = json!({
        "code": 1012,
        "error": "MULTIPART_ERROR",
        "message": "Error parsing `multipart/form-data` request"
    })
)]
pub struct MultipartErrorResponse(pub ErrorResponse);

#[derive(ToResponse)]
#[response(
    description = "Payload Too Large",
    content_type = "application/json",
    example = json!({
        "code": 1013,
        "error": "PAYLOAD_TOO_LARGE",
        "message": "Request body is too large"
    })
)]
pub struct PayloadTooLargeResponse(pub ErrorResponse);
