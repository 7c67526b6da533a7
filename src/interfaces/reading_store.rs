use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crate::error::Result;
use crate::types::Reading;

/// Append-only persistence of readings.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReadingStore: Send + Sync {
    /// Idempotent schema setup.
    async fn init(&self) -> Result<()>;

    async fn add_reading(&self, reading: &Reading) -> Result<()>;

    /// Most recent reading by timestamp, `None` when the store is empty.
    async fn latest_reading(&self) -> Result<Option<Reading>>;

    /// Readings within the inclusive range, newest first, at most `limit` rows.
    async fn readings(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Reading>>;

    /// Administrative bulk delete. Returns the number of removed rows.
    async fn clear_all(&self) -> Result<u64>;
}
