use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A persisted observation of the monitored tank level.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

impl Reading {
    pub fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        Reading { timestamp, value }
    }

    /// A reading stamped with the current wall-clock time.
    pub fn now(value: f64) -> Self {
        Reading::new(Utc::now(), value)
    }

    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.timestamp
    }
}
