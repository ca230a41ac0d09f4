//! Application state management.
//!
//! The state is cloned for each handler (Arc clones only) and holds:
//! - Configuration
//! - The vision service, which owns the task registry and temp storage

use domain_vision::VisionService;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration loaded from environment variables
    pub config: crate::config::Config,
    /// Upload/stream pipeline; shared with the shutdown cleanup
    pub vision: Arc<VisionService>,
}
