use std::time::Duration;
use serde::{Deserialize, Serialize};

pub mod loader;

pub use loader::AppConfig;

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Comma-separated list of allowed CORS origins.
    pub cors_origins: String,
    pub enable_seed_endpoint: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origins: "http://localhost:3000".to_string(),
            enable_seed_endpoint: true,
        }
    }
}

impl ServerConfig {
    pub fn cors_origin_list(&self) -> Vec<String> {
        self.cors_origins
            .split(',')
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Upstream push feed (Lightstreamer) settings.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct FeedConfig {
    pub server_url: String,
    pub adapter_set: String,
    pub item: String,
    pub field: String,
    pub client_id: String,
    pub connect_timeout_secs: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        FeedConfig {
            server_url: "https://push.lightstreamer.com".to_string(),
            adapter_set: "ISSLIVE".to_string(),
            item: "NODE3000005".to_string(),  // Urine tank level
            field: "Value".to_string(),
            client_id: "mgQkwtwdysogQz2BJ4Ji kOj2Bg".to_string(),
            connect_timeout_secs: 15,
        }
    }
}

impl FeedConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct PollingConfig {
    pub interval_secs: u64,
    pub initial_data_attempts: u32,
    pub initial_data_wait_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        PollingConfig {
            interval_secs: 60,
            initial_data_attempts: 5,
            initial_data_wait_ms: 1000,
        }
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn initial_data_wait(&self) -> Duration {
        Duration::from_millis(self.initial_data_wait_ms)
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    pub database_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            database_path: "./data/pissgraph.db".to_string(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// "text" or "json"
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}
