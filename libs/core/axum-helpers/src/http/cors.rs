use axum::http::{HeaderName, HeaderValue, Method, header};
use std::io;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, CorsLayer};

/// Parses a comma-separated origin list such as
/// `http://localhost:3000,https://app.example.com`.
///
/// Blank entries are ignored; an empty result is an error.
pub fn parse_allowed_origins(origins: &str) -> io::Result<Vec<HeaderValue>> {
    let allowed: Vec<HeaderValue> = origins
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(HeaderValue::from_str)
        .collect::<Result<_, _>>()
        .map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Invalid CORS_ALLOWED_ORIGIN value: {}", e),
            )
        })?;

    if allowed.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "CORS_ALLOWED_ORIGIN cannot be empty",
        ));
    }

    Ok(allowed)
}

/// Creates a CORS layer for browser clients of the upload and stream routes.
///
/// - Methods: GET, POST, OPTIONS
/// - Headers: Content-Type, Accept, Cache-Control, Last-Event-ID
/// - Credentials allowed, 1 hour max age
pub fn create_cors_layer(allowed_origins: Vec<HeaderValue>) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed_origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::ACCEPT,
            header::CACHE_CONTROL,
            HeaderName::from_static("last-event-id"),
        ])
        .allow_credentials(true)
        .max_age(Duration::from_secs(3600))
}
