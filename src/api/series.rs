use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::Serialize;
use crate::types::Reading;

/// A stored point older than this gets a synthetic "now" point after it.
const SYNTHETIC_POINT_MIN_AGE_SECS: i64 = 60;
/// How far in the past `end_time` may lie and still count as "now".
const NOW_TOLERANCE_SECS: i64 = 10;
const STALE_AFTER_SECS: i64 = 600;

const SEED_POINTS: i64 = 12;
const SEED_SPACING_MINUTES: i64 = 5;
const SEED_BASE_LEVEL: f64 = 45.0;
const SEED_JITTER: f64 = 2.0;

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct DataPoint {
    pub timestamp: DateTime<Utc>,
    pub urine_tank_level: f64,
}

impl From<Reading> for DataPoint {
    fn from(reading: Reading) -> Self {
        DataPoint {
            timestamp: reading.timestamp,
            urine_tank_level: reading.value,
        }
    }
}

/// Turn newest-first store rows into a chronological series.
///
/// When the newest stored point is more than a minute old and the requested
/// range reaches the present, a point at `now` is appended carrying the live
/// value (or the last stored value when nothing is live). The tank level is
/// flat between changes, so this extends the line up to the present.
pub fn build_series(
    newest_first: Vec<Reading>,
    end_time: Option<DateTime<Utc>>,
    live: Option<f64>,
    now: DateTime<Utc>,
) -> Vec<DataPoint> {
    let mut points: Vec<DataPoint> = newest_first.into_iter().rev().map(DataPoint::from).collect();

    let Some(last) = points.last().copied() else {
        return points;
    };

    let includes_now = end_time
        .map(|end| end - now >= Duration::seconds(-NOW_TOLERANCE_SECS))
        .unwrap_or(true);
    let is_old = now - last.timestamp > Duration::seconds(SYNTHETIC_POINT_MIN_AGE_SECS);

    if includes_now && is_old {
        points.push(DataPoint {
            timestamp: now,
            urine_tank_level: live.unwrap_or(last.urine_tank_level),
        });
    }

    points
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LatestStatus {
    Active,
    Stale,
    /// Nothing stored yet; value taken straight from the feed.
    Live,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct LatestReading {
    pub timestamp: DateTime<Utc>,
    pub urine_tank_level: f64,
    pub status: LatestStatus,
}

pub fn latest_view(
    stored: Option<Reading>,
    live: Option<f64>,
    now: DateTime<Utc>,
) -> Option<LatestReading> {
    match (stored, live) {
        (Some(reading), _) => {
            let stale = reading.age(now) > Duration::seconds(STALE_AFTER_SECS);
            Some(LatestReading {
                timestamp: reading.timestamp,
                urine_tank_level: reading.value,
                status: if stale { LatestStatus::Stale } else { LatestStatus::Active },
            })
        }
        (None, Some(value)) => Some(LatestReading {
            timestamp: now,
            urine_tank_level: value,
            status: LatestStatus::Live,
        }),
        (None, None) => None,
    }
}

/// Sample history over the last hour: one point every five minutes around 45%.
pub fn seed_readings<R: Rng>(rng: &mut R, now: DateTime<Utc>) -> Vec<Reading> {
    (0..SEED_POINTS)
        .map(|i| {
            let timestamp = now - Duration::minutes(60 - i * SEED_SPACING_MINUTES);
            let level = SEED_BASE_LEVEL + rng.gen_range(-SEED_JITTER..=SEED_JITTER);
            Reading::new(timestamp, level.clamp(0.0, 100.0))
        })
        .collect()
}
