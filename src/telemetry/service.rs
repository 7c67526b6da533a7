use std::sync::Arc;
use tokio::sync::Mutex;
use crate::config::{FeedConfig, PollingConfig};
use crate::error::Result;
use crate::interfaces::feed_transport::FeedTransport;
use crate::interfaces::reading_store::ReadingStore;
use crate::telemetry::connection::{ConnectionSettings, FeedConnectionManager};
use crate::telemetry::coordinator::{PollingCoordinator, PollingSettings};
use crate::utils::task_supervisor::TaskSupervisor;

const POLLING_TASK: &str = "polling_coordinator";

/// Wires one feed connection to the store and owns the polling task.
pub struct TelemetryService {
    store: Arc<dyn ReadingStore>,
    connection: Arc<FeedConnectionManager>,
    coordinator: Arc<PollingCoordinator>,
    supervisor: Mutex<TaskSupervisor>,
}

impl TelemetryService {
    pub fn new(
        store: Arc<dyn ReadingStore>,
        transport: Arc<dyn FeedTransport>,
        connection: ConnectionSettings,
        polling: PollingSettings,
    ) -> Self {
        let connection = Arc::new(FeedConnectionManager::new(transport, connection));
        let coordinator = Arc::new(PollingCoordinator::new(connection.clone(), store.clone(), polling));

        TelemetryService {
            store,
            connection,
            coordinator,
            supervisor: Mutex::new(TaskSupervisor::new()),
        }
    }

    pub fn from_config(
        store: Arc<dyn ReadingStore>,
        transport: Arc<dyn FeedTransport>,
        feed: &FeedConfig,
        polling: &PollingConfig,
    ) -> Self {
        Self::new(store, transport, feed.into(), polling.into())
    }

    /// Prepare the store and start polling in the background. Does not wait
    /// for the feed to connect.
    pub async fn start(&self) -> Result<()> {
        tracing::info!("Initializing telemetry service...");
        self.store.init().await?;

        self.supervisor
            .lock()
            .await
            .spawn(POLLING_TASK, self.coordinator.clone().run());
        tracing::info!("Telemetry service started successfully");
        Ok(())
    }

    /// Cancel polling, wait for it to unwind, then release the feed.
    pub async fn stop(&self) {
        self.supervisor.lock().await.shutdown_all().await;
        self.connection.disconnect().await;
        tracing::info!("Telemetry service stopped");
    }

    pub async fn is_polling(&self) -> bool {
        self.supervisor.lock().await.is_running(POLLING_TASK)
    }

    pub fn connection(&self) -> &Arc<FeedConnectionManager> {
        &self.connection
    }

    pub fn coordinator(&self) -> &Arc<PollingCoordinator> {
        &self.coordinator
    }

    pub fn current_value(&self) -> Option<f64> {
        self.connection.current_value()
    }
}
