use crate::config::*;
use crate::error::{Error, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub feed: FeedConfig,
    pub polling: PollingConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

/// Flat variable names accepted for compatibility with existing deployments.
const LEGACY_ENV_KEYS: &[(&str, &str)] = &[
    ("PORT", "server.port"),
    ("CORS_ORIGINS", "server.cors_origins"),
    ("ENABLE_SEED_ENDPOINT", "server.enable_seed_endpoint"),
    ("DATABASE_PATH", "storage.database_path"),
    ("POLLING_INTERVAL", "polling.interval_secs"),
];

impl AppConfig {
    pub fn load(env: &str) -> Result<Self> {
        let mut builder = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(
                Environment::with_prefix("PISSGRAPH")
                    .prefix_separator("__")
                    .separator("__"),
            );

        for (var, key) in LEGACY_ENV_KEYS {
            builder = builder
                .set_override_option(*key, std::env::var(var).ok())
                .map_err(|e| Error::ConfigError(e.to_string()))?;
        }

        let config = builder
            .build()
            .map_err(|e| Error::ConfigError(e.to_string()))?;

        let app: AppConfig = config.try_deserialize()
            .map_err(|e| Error::ConfigError(e.to_string()))?;
        app.validate()?;
        Ok(app)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from_str(contents, config::FileFormat::Toml))
            .build()
            .map_err(|e| Error::ConfigError(e.to_string()))?;

        let app: AppConfig = config.try_deserialize()
            .map_err(|e| Error::ConfigError(e.to_string()))?;
        app.validate()?;
        Ok(app)
    }

    fn validate(&self) -> Result<()> {
        if self.polling.interval_secs == 0 {
            return Err(Error::ConfigError("polling.interval_secs must be positive".to_string()));
        }
        if self.feed.connect_timeout_secs == 0 {
            return Err(Error::ConfigError("feed.connect_timeout_secs must be positive".to_string()));
        }
        if self.feed.item.is_empty() || self.feed.field.is_empty() {
            return Err(Error::ConfigError("feed.item and feed.field are required".to_string()));
        }
        match self.logging.format.as_str() {
            "text" | "json" => Ok(()),
            other => Err(Error::ConfigError(format!("unknown logging.format: {}", other))),
        }
    }
}
