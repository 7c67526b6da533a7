use std::path::Path;
use std::sync::{Arc, Mutex};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use crate::error::{Error, Result};
use crate::interfaces::reading_store::ReadingStore;
use crate::types::Reading;

/// SQLite-backed reading history. Timestamps are stored as UTC milliseconds.
pub struct SqliteReadingStore {
    db_path: String,
    conn: Arc<Mutex<Connection>>,
}

impl SqliteReadingStore {
    pub fn open(db_path: &str) -> Result<Self> {
        if db_path == ":memory:" {
            return Self::in_memory();
        }

        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        Ok(Self {
            db_path: db_path.to_string(),
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self {
            db_path: ":memory:".to_string(),
            conn: Arc::new(Mutex::new(Connection::open_in_memory()?)),
        })
    }

    pub fn path(&self) -> &str {
        &self.db_path
    }

    /// Run a blocking statement off the async runtime.
    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| Error::StorageTask("connection mutex poisoned".to_string()))?;
            f(&conn).map_err(Error::from)
        })
        .await
        .map_err(|e| Error::StorageTask(e.to_string()))?
    }
}

fn reading_from_row(row: &Row<'_>) -> rusqlite::Result<Reading> {
    let millis: i64 = row.get(0)?;
    let value: f64 = row.get(1)?;
    let timestamp = DateTime::<Utc>::from_timestamp_millis(millis).ok_or_else(|| {
        rusqlite::Error::IntegralValueOutOfRange(0, millis)
    })?;
    Ok(Reading { timestamp, value })
}

#[async_trait]
impl ReadingStore for SqliteReadingStore {
    async fn init(&self) -> Result<()> {
        let path = self.db_path.clone();
        self.with_conn(|conn| {
            conn.execute(
                "CREATE TABLE IF NOT EXISTS telemetry_readings (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    timestamp INTEGER NOT NULL,
                    urine_tank_level REAL NOT NULL
                )",
                [],
            )?;
            conn.execute(
                "CREATE INDEX IF NOT EXISTS idx_readings_timestamp ON telemetry_readings(timestamp)",
                [],
            )?;
            Ok(())
        })
        .await?;

        tracing::info!("SQLite database initialized at {}", path);
        Ok(())
    }

    async fn add_reading(&self, reading: &Reading) -> Result<()> {
        let millis = reading.timestamp.timestamp_millis();
        let value = reading.value;
        self.with_conn(move |conn| {
            conn.prepare_cached(
                "INSERT INTO telemetry_readings (timestamp, urine_tank_level) VALUES (?1, ?2)",
            )?
            .execute(params![millis, value])?;
            Ok(())
        })
        .await
    }

    async fn latest_reading(&self) -> Result<Option<Reading>> {
        self.with_conn(|conn| {
            conn.prepare_cached(
                "SELECT timestamp, urine_tank_level FROM telemetry_readings
                 ORDER BY timestamp DESC, id DESC LIMIT 1",
            )?
            .query_row([], reading_from_row)
            .optional()
        })
        .await
    }

    async fn readings(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Reading>> {
        let start = start.map(|t| t.timestamp_millis());
        let end = end.map(|t| t.timestamp_millis());
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        self.with_conn(move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT timestamp, urine_tank_level FROM telemetry_readings
                 WHERE (?1 IS NULL OR timestamp >= ?1)
                   AND (?2 IS NULL OR timestamp <= ?2)
                 ORDER BY timestamp DESC, id DESC
                 LIMIT ?3",
            )?;
            let rows = stmt.query_map(params![start, end, limit], reading_from_row)?;
            rows.collect()
        })
        .await
    }

    async fn clear_all(&self) -> Result<u64> {
        let deleted = self
            .with_conn(|conn| conn.execute("DELETE FROM telemetry_readings", []))
            .await?;
        tracing::info!("Cleared {} telemetry readings", deleted);
        Ok(deleted as u64)
    }
}
