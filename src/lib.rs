pub mod utils;
pub mod types;
pub mod telemetry;
pub mod storage;
pub mod error;
pub mod config;
pub mod observability;
pub mod interfaces;
pub mod api;
