use crate::{env_or_default, env_parse_or, env_secs_opt, ConfigError, FromEnv};
use std::time::Duration;

pub const DEFAULT_MODEL_BASE_URL: &str = "http://localhost:1234/v1";
pub const DEFAULT_MODEL_API_KEY: &str = "not-needed";
pub const DEFAULT_MODEL_NAME: &str = "your-multimodal-model-name";
pub const DEFAULT_MAX_TOKENS: u32 = 4000;

/// Connection settings for an OpenAI-compatible chat completions endpoint.
#[derive(Clone, Debug)]
pub struct ModelEndpointConfig {
    /// Base URL without the trailing `/chat/completions`
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    /// Whole-request timeout. `None` waits as long as the backend keeps streaming.
    pub timeout: Option<Duration>,
}

impl ModelEndpointConfig {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            model: model.into(),
            ..Self::default()
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = api_key.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Full URL of the chat completions route.
    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

impl Default for ModelEndpointConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_MODEL_BASE_URL.to_string(),
            api_key: DEFAULT_MODEL_API_KEY.to_string(),
            model: DEFAULT_MODEL_NAME.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            timeout: None,
        }
    }
}

impl FromEnv for ModelEndpointConfig {
    /// Reads the VISION_MODEL_* variables; every value has a local-server default.
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            base_url: env_or_default("VISION_MODEL_BASE_URL", DEFAULT_MODEL_BASE_URL),
            api_key: env_or_default("VISION_MODEL_API_KEY", DEFAULT_MODEL_API_KEY),
            model: env_or_default("VISION_MODEL_NAME", DEFAULT_MODEL_NAME),
            max_tokens: env_parse_or("VISION_MODEL_MAX_TOKENS", DEFAULT_MAX_TOKENS)?,
            timeout: env_secs_opt("VISION_MODEL_TIMEOUT_SECS")?,
        })
    }
}
