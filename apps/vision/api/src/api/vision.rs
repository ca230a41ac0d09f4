//! Image description API routes
//!
//! Upload images and follow their progress over server-sent events.

use axum::Router;
use domain_vision::{VisionState, handlers};
use std::sync::Arc;

pub fn router(state: &crate::state::AppState) -> Router {
    let vision_state = VisionState::new(
        Arc::clone(&state.vision),
        state.config.vision.stream_attach_timeout,
    );

    handlers::router(vision_state, state.config.server.max_body_bytes)
}
