//! Vision Domain Library
//!
//! Accepts image uploads, asks a vision model to describe each image, and
//! streams per-image progress back to the client as server-sent events.
//!
//! # Architecture
//!
//! ```text
//!  POST /upload                         GET /stream/{task_id}
//!       │                                        │
//! ┌─────▼─────────┐  register   ┌──────────────┐ │ attach
//! │ VisionService ├────────────►│ TaskRegistry │◄┘
//! └─────┬─────────┘             └──────▲───────┘
//!       │ spawn                        │ events (mpsc, FIFO)
//! ┌─────▼──────────┐            ┌──────┴───────┐
//! │ BatchProcessor ├───────────►│ EventSender  │
//! └─────┬──────────┘            └──────────────┘
//!       │
//! ┌─────▼──────────┐
//! │ ModelGateway   │  OpenAI-compatible streaming chat completions
//! └────────────────┘
//! ```
//!
//! Each upload becomes one task. Images are processed one at a time; every
//! image ends with exactly one `image_complete` or `error` event, and the task
//! ends with a single `end`. A stream client that disconnects early cancels
//! the rest of its batch.
//!
//! # Usage
//!
//! ```rust,no_run
//! use domain_vision::{
//!     OpenAiCompatibleGateway, TaskRegistry, VisionConfig, VisionService, VisionState, handlers,
//! };
//! use core_config::FromEnv;
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = VisionConfig::from_env()?;
//! let gateway = Arc::new(OpenAiCompatibleGateway::new(config.model.clone())?);
//! let service = Arc::new(VisionService::new(
//!     Arc::new(TaskRegistry::new()),
//!     gateway,
//!     &config,
//! ));
//!
//! let state = VisionState::new(service, config.stream_attach_timeout);
//! let router: axum::Router = handlers::router(state, 50 * 1024 * 1024);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod output;
pub mod processor;
pub mod registry;
pub mod service;
pub mod storage;
pub mod stream;

pub use config::VisionConfig;
pub use error::{ModelError, ModelResult, RegistryError, RegistryResult, VisionError, VisionResult};
pub use gateway::{ModelGateway, OpenAiCompatibleGateway, TokenStream, VisionRequest};
pub use handlers::{ApiDoc, VisionState};
pub use metrics::{ImageOutcome, VisionMetrics};
pub use models::{
    EventKind, ImageDescription, ImageItem, IncomingFile, TaskEvent, UploadResponse, UploadedImage,
};
pub use output::{ModelOutput, parse_model_output};
pub use processor::{BatchProcessor, ProcessorSettings};
pub use registry::{EventSender, Subscription, TaskHandle, TaskRegistry};
pub use service::VisionService;
pub use storage::TempStorage;
pub use stream::task_events;
