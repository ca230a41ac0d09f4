use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use futures::Stream;
use std::pin::Pin;

use crate::error::ModelResult;

/// Lazy, finite, non-restartable sequence of answer fragments.
pub type TokenStream = Pin<Box<dyn Stream<Item = ModelResult<String>> + Send>>;

/// One image-description request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisionRequest {
    pub system_prompt: String,
    pub instruction: String,
    /// `data:{media_type};base64,{payload}`
    pub image_url: String,
}

impl VisionRequest {
    pub fn new(
        system_prompt: impl Into<String>,
        instruction: impl Into<String>,
        media_type: &str,
        image: &[u8],
    ) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            instruction: instruction.into(),
            image_url: data_uri(media_type, image),
        }
    }
}

/// Self-describing base64 data URI.
pub fn data_uri(media_type: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", media_type, STANDARD.encode(bytes))
}

/// Vision model backend.
///
/// One call issues one streaming completion; there is no retry.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ModelGateway: Send + Sync {
    /// Model identifier, for logs
    fn model_name(&self) -> String;

    /// Start a streaming completion for `request`.
    ///
    /// Errors before the first fragment are returned directly; later failures
    /// arrive as an `Err` item in the stream.
    async fn stream_completion(&self, request: VisionRequest) -> ModelResult<TokenStream>;
}
