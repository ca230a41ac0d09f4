//! Type-safe error codes for API responses.
//!
//! Each error code carries:
//! - String representation for client consumption (e.g., "VALIDATION_ERROR")
//! - Integer code for logging and monitoring (e.g., 1001)
//! - Default human-readable message
//!
//! # Example
//!
//! ```rust
//! use axum_helpers::errors::ErrorCode;
//!
//! let code = ErrorCode::ValidationError;
//! assert_eq!(code.as_str(), "VALIDATION_ERROR");
//! assert_eq!(code.code(), 1001);
//! assert_eq!(code.default_message(), "Request validation failed");
//! ```

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Standardized error codes for API responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // 1000-1999: client and generic server errors
    /// Request validation failed
    ValidationError,

    /// Requested resource was not found
    NotFound,

    /// An unexpected internal server error occurred
    InternalError,

    /// Request conflicts with current resource state
    Conflict,

    /// Multipart body could not be read
    MultipartError,

    /// Request body exceeded the configured limit
    PayloadTooLarge,
}

impl ErrorCode {
    /// SCREAMING_SNAKE_CASE identifier for programmatic handling by clients.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ValidationError => "VALIDATION_ERROR",
            Self::NotFound => "NOT_FOUND",
            Self::InternalError => "INTERNAL_ERROR",
            Self::Conflict => "CONFLICT",
            Self::MultipartError => "MULTIPART_ERROR",
            Self::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
        }
    }

    /// Integer code used in structured logs and metrics.
    ///
    /// Ranges:
    /// - 1000-1999: Client and generic server errors
    pub fn code(&self) -> i32 {
        match self {
            Self::ValidationError => 1001,
            Self::NotFound => 1004,
            Self::InternalError => 1005,
            Self::Conflict => 1008,
            Self::MultipartError => 1012,
            Self::PayloadTooLarge => 1013,
        }
    }

    /// Default user-facing message; handlers may override it.
    pub fn default_message(&self) -> &'static str {
        match self {
            Self::ValidationError => "Request validation failed",
            Self::NotFound => "Resource not found",
            Self::InternalError => "An internal server error occurred",
            Self::Conflict => "Resource already exists",
            Self::MultipartError => "Failed to read multipart body",
            Self::PayloadTooLarge => "Request body is too large",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
