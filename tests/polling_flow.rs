mod common;

use std::sync::Arc;
use std::time::Duration;

use pissgraph::interfaces::reading_store::ReadingStore;
use pissgraph::telemetry::{
    ConnectionState, CycleOutcome, FeedConnectionManager, PollingCoordinator, TelemetryService,
};

use common::{connection_settings, fast_polling, memory_store, Script, ScriptedTransport};

async fn stored_values(store: &dyn ReadingStore) -> Vec<f64> {
    let mut readings = store.readings(None, None, 1000).await.unwrap();
    readings.reverse();
    readings.into_iter().map(|r| r.value).collect()
}

#[tokio::test]
async fn only_value_changes_are_persisted() {
    let store = memory_store().await;
    let transport = ScriptedTransport::streaming();
    let conn = Arc::new(FeedConnectionManager::new(
        transport.clone(),
        connection_settings(Duration::from_secs(1)),
    ));
    let coordinator = PollingCoordinator::new(conn.clone(), store.clone(), fast_polling());

    assert!(conn.ensure_connected().await);

    let mut outcomes = Vec::new();
    for raw in ["45.0", "45.0", "46.2", "46.2", "46.2", "44.9"] {
        transport.push(raw);
        outcomes.push(coordinator.run_cycle().await.unwrap());
    }

    assert_eq!(stored_values(store.as_ref()).await, vec![45.0, 46.2, 44.9]);
    assert_eq!(outcomes[1], CycleOutcome::Unchanged(45.0));
    assert!(matches!(outcomes[5], CycleOutcome::Stored(r) if r.value == 44.9));
}

#[tokio::test]
async fn first_value_is_stored_once() {
    let store = memory_store().await;
    let transport = ScriptedTransport::streaming();
    let conn = Arc::new(FeedConnectionManager::new(
        transport.clone(),
        connection_settings(Duration::from_secs(1)),
    ));
    let coordinator = PollingCoordinator::new(conn.clone(), store.clone(), fast_polling());

    // First cycle connects, but the feed has not pushed anything yet.
    assert_eq!(coordinator.run_cycle().await.unwrap(), CycleOutcome::NoData);

    transport.push("45.0");
    coordinator.run_cycle().await.unwrap();
    coordinator.run_cycle().await.unwrap();

    assert_eq!(stored_values(store.as_ref()).await, vec![45.0]);
    assert_eq!(transport.opens(), 1);
}

#[tokio::test]
async fn unreachable_feed_stores_nothing() {
    let store = memory_store().await;
    let transport = ScriptedTransport::new(Script::Silent);
    let conn = Arc::new(FeedConnectionManager::new(
        transport.clone(),
        connection_settings(Duration::from_millis(20)),
    ));
    let coordinator = PollingCoordinator::new(conn.clone(), store.clone(), fast_polling());

    for _ in 0..5 {
        assert_eq!(coordinator.run_cycle().await.unwrap(), CycleOutcome::FeedUnavailable);
    }

    assert!(stored_values(store.as_ref()).await.is_empty());
    assert_eq!(transport.opens(), 5);
    assert_eq!(conn.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn service_stop_ends_polling_and_ignores_late_updates() {
    let store = memory_store().await;
    let transport = ScriptedTransport::streaming();
    let service = TelemetryService::new(
        store.clone(),
        transport.clone(),
        connection_settings(Duration::from_secs(1)),
        fast_polling(),
    );

    service.start().await.unwrap();
    assert!(service.is_polling().await);

    let mut connected = false;
    for _ in 0..100 {
        if service.connection().is_connected() {
            connected = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(connected);

    transport.push("45.0");
    let mut stored = false;
    for _ in 0..100 {
        if !stored_values(store.as_ref()).await.is_empty() {
            stored = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(stored);

    service.stop().await;
    assert!(!service.is_polling().await);
    assert_eq!(service.connection().state(), ConnectionState::Disconnected);
    assert!(transport.session_disconnected());

    let cycles = service.coordinator().cycles_run();
    transport.push("99.0");
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(service.current_value(), Some(45.0));
    assert_eq!(service.coordinator().cycles_run(), cycles);
    assert_eq!(stored_values(store.as_ref()).await, vec![45.0]);
}
