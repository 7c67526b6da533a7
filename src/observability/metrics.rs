use lazy_static::lazy_static;
use prometheus::{
    Encoder, Gauge, IntCounter, Registry, TextEncoder,
};
use std::sync::Once;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // Feed metrics
    pub static ref FEED_UPDATES: IntCounter = IntCounter::new(
        "feed_updates_total",
        "Total number of accepted value updates from the push feed"
    ).unwrap();

    pub static ref FEED_PARSE_FAILURES: IntCounter = IntCounter::new(
        "feed_parse_failures_total",
        "Total number of discarded feed updates"
    ).unwrap();

    pub static ref CONNECTION_ATTEMPTS: IntCounter = IntCounter::new(
        "feed_connection_attempts_total",
        "Total number of feed connection attempts"
    ).unwrap();

    pub static ref CONNECTION_FAILURES: IntCounter = IntCounter::new(
        "feed_connection_failures_total",
        "Total number of failed feed connection attempts"
    ).unwrap();

    pub static ref LIVE_VALUE: Gauge = Gauge::new(
        "live_tank_level",
        "Most recent tank level observed from the feed"
    ).unwrap();

    // Polling metrics
    pub static ref POLL_CYCLES: IntCounter = IntCounter::new(
        "poll_cycles_total",
        "Total number of polling cycles run"
    ).unwrap();

    pub static ref POLL_FAILURES: IntCounter = IntCounter::new(
        "poll_cycle_failures_total",
        "Total number of polling cycles that failed"
    ).unwrap();

    pub static ref READINGS_STORED: IntCounter = IntCounter::new(
        "readings_stored_total",
        "Total number of readings persisted"
    ).unwrap();
}

static REGISTER: Once = Once::new();

pub fn register_metrics() {
    REGISTER.call_once(|| {
        REGISTRY.register(Box::new(FEED_UPDATES.clone())).unwrap();
        REGISTRY.register(Box::new(FEED_PARSE_FAILURES.clone())).unwrap();
        REGISTRY.register(Box::new(CONNECTION_ATTEMPTS.clone())).unwrap();
        REGISTRY.register(Box::new(CONNECTION_FAILURES.clone())).unwrap();
        REGISTRY.register(Box::new(LIVE_VALUE.clone())).unwrap();
        REGISTRY.register(Box::new(POLL_CYCLES.clone())).unwrap();
        REGISTRY.register(Box::new(POLL_FAILURES.clone())).unwrap();
        REGISTRY.register(Box::new(READINGS_STORED.clone())).unwrap();
    });
}

/// Render the registry in the Prometheus text format.
pub fn gather_text() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_cycles_is_an_integer_counter() {
        register_metrics();
        let before: u64 = POLL_CYCLES.get();
        POLL_CYCLES.inc();
        assert!(POLL_CYCLES.get() > before);

        let text = gather_text();
        let line = text
            .lines()
            .find(|l| l.starts_with("poll_cycles_total "))
            .unwrap();
        let value = line.split_whitespace().nth(1).unwrap();
        assert!(value.parse::<u64>().is_ok(), "{}", line);
    }
}
