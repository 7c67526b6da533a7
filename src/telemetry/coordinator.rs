use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use futures_util::FutureExt;
use tokio::time::sleep;
use tracing::Instrument;
use crate::config::PollingConfig;
use crate::error::Result;
use crate::interfaces::reading_store::ReadingStore;
use crate::observability::metrics;
use crate::observability::tracing::trace_poll_cycle;
use crate::telemetry::change_detector::should_store;
use crate::telemetry::connection::FeedConnectionManager;
use crate::types::Reading;

#[derive(Clone, Debug)]
pub struct PollingSettings {
    pub interval: Duration,
    pub initial_data_attempts: u32,
    pub initial_data_wait: Duration,
}

impl From<&PollingConfig> for PollingSettings {
    fn from(config: &PollingConfig) -> Self {
        PollingSettings {
            interval: config.interval(),
            initial_data_attempts: config.initial_data_attempts,
            initial_data_wait: config.initial_data_wait(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum CycleOutcome {
    /// Could not connect this cycle; retried on the next one.
    FeedUnavailable,
    /// Connected but no value has been pushed yet.
    NoData,
    Unchanged(f64),
    Stored(Reading),
}

/// Turns live feed state into durable history on a fixed interval.
pub struct PollingCoordinator {
    connection: Arc<FeedConnectionManager>,
    store: Arc<dyn ReadingStore>,
    settings: PollingSettings,
    cycles: AtomicU64,
}

impl PollingCoordinator {
    pub fn new(
        connection: Arc<FeedConnectionManager>,
        store: Arc<dyn ReadingStore>,
        settings: PollingSettings,
    ) -> Self {
        PollingCoordinator {
            connection,
            store,
            settings,
            cycles: AtomicU64::new(0),
        }
    }

    pub fn cycles_run(&self) -> u64 {
        self.cycles.load(Ordering::SeqCst)
    }

    /// Run forever. Only cancellation of the enclosing task stops the loop.
    pub async fn run(self: Arc<Self>) {
        tracing::info!("Polling every {:?}", self.settings.interval);

        loop {
            let cycle = self.cycles.load(Ordering::SeqCst) + 1;
            let result = AssertUnwindSafe(self.run_cycle().instrument(trace_poll_cycle(cycle)))
                .catch_unwind()
                .await;

            match result {
                Ok(Ok(outcome)) => tracing::debug!("Poll cycle {} finished: {:?}", cycle, outcome),
                Ok(Err(e)) => {
                    metrics::POLL_FAILURES.inc();
                    tracing::error!("Failed to poll telemetry: {}", e);
                }
                Err(_) => {
                    metrics::POLL_FAILURES.inc();
                    tracing::error!("Poll cycle {} panicked", cycle);
                }
            }

            sleep(self.settings.interval).await;
        }
    }

    /// One poll: connect, read the live value, persist it if it changed.
    pub async fn run_cycle(&self) -> Result<CycleOutcome> {
        self.cycles.fetch_add(1, Ordering::SeqCst);
        metrics::POLL_CYCLES.inc();
        tracing::debug!("Starting telemetry poll cycle");

        if !self.connection.ensure_connected().await {
            tracing::warn!("Could not connect to telemetry stream, will retry on next poll");
            return Ok(CycleOutcome::FeedUnavailable);
        }

        let Some(value) = self.await_initial_value().await else {
            tracing::debug!("No telemetry value available, connection may still be establishing");
            return Ok(CycleOutcome::NoData);
        };

        let latest = self.store.latest_reading().await?;
        if !should_store(value, latest.as_ref()) {
            tracing::debug!("Value unchanged at {}%, no storage needed", value);
            return Ok(CycleOutcome::Unchanged(value));
        }

        match &latest {
            None => tracing::info!("Database empty, storing initial value: {}%", value),
            Some(last) => tracing::info!("Value changed from {}% to {}%", last.value, value),
        }

        let reading = Reading::now(value);
        self.store.add_reading(&reading).await?;
        metrics::READINGS_STORED.inc();
        tracing::info!("Stored new urine tank level: {}%", value);
        Ok(CycleOutcome::Stored(reading))
    }

    /// Give a fresh subscription a few short waits to deliver its snapshot.
    async fn await_initial_value(&self) -> Option<f64> {
        if let Some(value) = self.connection.current_value() {
            return Some(value);
        }

        tracing::debug!("Waiting briefly for initial telemetry data...");
        for _ in 0..self.settings.initial_data_attempts {
            sleep(self.settings.initial_data_wait).await;
            if let Some(value) = self.connection.current_value() {
                tracing::info!("Received initial telemetry data: {}%", value);
                return Some(value);
            }
        }

        tracing::debug!("No initial telemetry data received yet, will keep trying");
        None
    }
}
