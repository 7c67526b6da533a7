//! Telemetry acquisition: feed connection, change detection and polling.

pub mod change_detector;
pub mod connection;
pub mod coordinator;
pub mod lightstreamer;
pub mod service;
pub mod signal;

pub use change_detector::should_store;
pub use connection::{ConnectionSettings, ConnectionState, FeedConnectionManager};
pub use coordinator::{CycleOutcome, PollingCoordinator, PollingSettings};
pub use service::TelemetryService;
