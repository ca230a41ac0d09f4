use core_config::model::ModelEndpointConfig;
use core_config::{ConfigError, FromEnv, env_or_default, env_parse_or};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_TEMP_DIR: &str = "./temp";
pub const DEFAULT_RESPONSE_LANGUAGE: &str = "Spanish";
pub const DEFAULT_STREAM_ATTACH_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_UNCLAIMED_TASK_TTL_SECS: u64 = 600;

/// Settings for the upload / stream pipeline.
#[derive(Clone, Debug)]
pub struct VisionConfig {
    /// Where uploaded images wait for processing
    pub temp_dir: PathBuf,
    /// How long a stream waits for its task to be registered; `None` waits forever
    pub stream_attach_timeout: Option<Duration>,
    /// How long a finished task is kept for a stream that never attached; `None` keeps it
    pub unclaimed_task_ttl: Option<Duration>,
    /// Pause after each status event
    pub status_delay: Duration,
    /// Natural language the model is asked to answer in
    pub response_language: String,
    pub model: ModelEndpointConfig,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            temp_dir: PathBuf::from(DEFAULT_TEMP_DIR),
            stream_attach_timeout: Some(Duration::from_secs(DEFAULT_STREAM_ATTACH_TIMEOUT_SECS)),
            unclaimed_task_ttl: Some(Duration::from_secs(DEFAULT_UNCLAIMED_TASK_TTL_SECS)),
            status_delay: Duration::ZERO,
            response_language: DEFAULT_RESPONSE_LANGUAGE.to_string(),
            model: ModelEndpointConfig::default(),
        }
    }
}

fn secs_or_forever(key: &str, default: u64) -> Result<Option<Duration>, ConfigError> {
    let secs: u64 = env_parse_or(key, default)?;
    Ok((secs > 0).then(|| Duration::from_secs(secs)))
}

impl FromEnv for VisionConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            temp_dir: PathBuf::from(env_or_default("VISION_TEMP_DIR", DEFAULT_TEMP_DIR)),
            stream_attach_timeout: secs_or_forever(
                "VISION_STREAM_ATTACH_TIMEOUT_SECS",
                DEFAULT_STREAM_ATTACH_TIMEOUT_SECS,
            )?,
            unclaimed_task_ttl: secs_or_forever(
                "VISION_UNCLAIMED_TASK_TTL_SECS",
                DEFAULT_UNCLAIMED_TASK_TTL_SECS,
            )?,
            status_delay: Duration::from_millis(env_parse_or("VISION_STATUS_DELAY_MS", 0u64)?),
            response_language: env_or_default("VISION_RESPONSE_LANGUAGE", DEFAULT_RESPONSE_LANGUAGE),
            model: ModelEndpointConfig::from_env()?,
        })
    }
}
