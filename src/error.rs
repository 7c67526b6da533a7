use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    // Feed Connection Errors
    #[error("Feed connection failed: {0}")]
    ConnectionFailed(String),

    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    #[error("Connection closed")]
    ConnectionClosed,

    // Parse Errors
    #[error("Invalid telemetry value for {item}: {raw:?}")]
    InvalidValue {
        item: String,
        raw: String,
    },

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    // Storage Errors
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Storage task failed: {0}")]
    StorageTask(String),

    // System Errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // IO Errors
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
