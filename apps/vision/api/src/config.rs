use core_config::{AppInfo, FromEnv, app_info, server::ServerConfig};
use domain_vision::VisionConfig;
use eyre::WrapErr;

// Re-export Environment for use in other modules
pub use core_config::Environment;

/// Application-specific configuration
/// Composes shared config components from the `config` library
#[derive(Clone, Debug)]
pub struct Config {
    pub app: AppInfo,
    pub server: ServerConfig,
    pub vision: VisionConfig,
    pub environment: Environment,
}

impl Config {
    pub fn from_env() -> eyre::Result<Self> {
        let environment = Environment::from_env();
        let server = ServerConfig::from_env().wrap_err("Invalid server configuration")?; // HOST=0.0.0.0, PORT=8080
        let vision = VisionConfig::from_env().wrap_err("Invalid vision configuration")?;

        Ok(Self {
            app: app_info!(),
            server,
            vision,
            environment,
        })
    }
}
