#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use pissgraph::error::{Error, Result};
use pissgraph::interfaces::feed_transport::{
    FeedListener, FeedSession, FeedTransport, ItemUpdate, SessionStatus, SubscriptionId,
    SubscriptionRequest,
};
use pissgraph::storage::SqliteReadingStore;
use pissgraph::interfaces::reading_store::ReadingStore;
use pissgraph::telemetry::{ConnectionSettings, PollingSettings};

pub const ITEM: &str = "NODE3000005";
pub const FIELD: &str = "Value";

/// How the fake upstream answers a connection attempt.
#[derive(Clone, Debug)]
pub enum Script {
    /// Reports WS-STREAMING after `delay`.
    Stream { delay: Duration },
    /// Session opens but never reports streaming.
    Silent,
    /// Opening the session fails outright.
    Refuse,
}

/// In-process feed transport driven by a [`Script`]. Keeps every listener it
/// was handed so tests can push notifications after the fact.
pub struct ScriptedTransport {
    script: Script,
    opens: AtomicUsize,
    listeners: Mutex<Vec<Arc<dyn FeedListener>>>,
    disconnected: Arc<AtomicBool>,
}

impl ScriptedTransport {
    pub fn new(script: Script) -> Arc<Self> {
        Arc::new(ScriptedTransport {
            script,
            opens: AtomicUsize::new(0),
            listeners: Mutex::new(Vec::new()),
            disconnected: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn streaming() -> Arc<Self> {
        Self::new(Script::Stream { delay: Duration::ZERO })
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn session_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    fn latest_listener(&self) -> Arc<dyn FeedListener> {
        self.listeners
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no session opened yet")
    }

    /// Push a raw field value for the monitored item.
    pub fn push(&self, raw: &str) {
        let mut fields = HashMap::new();
        fields.insert(FIELD.to_string(), Some(raw.to_string()));
        self.latest_listener().on_item_update(ItemUpdate {
            item_name: ITEM.to_string(),
            fields,
        });
    }

    pub fn push_status(&self, status: SessionStatus) {
        self.latest_listener().on_status_change(status);
    }
}

#[async_trait]
impl FeedTransport for ScriptedTransport {
    async fn open(&self, listener: Arc<dyn FeedListener>) -> Result<Box<dyn FeedSession>> {
        self.opens.fetch_add(1, Ordering::SeqCst);

        if let Script::Refuse = self.script {
            return Err(Error::ConnectionFailed("connection refused".to_string()));
        }

        self.listeners.lock().unwrap().push(listener.clone());
        listener.on_status_change(SessionStatus::Connecting);

        if let Script::Stream { delay } = self.script {
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                listener.on_status_change(SessionStatus::ws_streaming());
            });
        }

        Ok(Box::new(ScriptedSession {
            next_id: 0,
            disconnected: self.disconnected.clone(),
        }))
    }
}

struct ScriptedSession {
    next_id: u32,
    disconnected: Arc<AtomicBool>,
}

#[async_trait]
impl FeedSession for ScriptedSession {
    async fn subscribe(&mut self, _request: SubscriptionRequest) -> Result<SubscriptionId> {
        self.next_id += 1;
        Ok(SubscriptionId(self.next_id))
    }

    async fn unsubscribe(&mut self, _id: SubscriptionId) -> Result<()> {
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.disconnected.store(true, Ordering::SeqCst);
        Ok(())
    }
}

pub fn connection_settings(timeout: Duration) -> ConnectionSettings {
    ConnectionSettings {
        item: ITEM.to_string(),
        field: FIELD.to_string(),
        connect_timeout: timeout,
    }
}

pub fn fast_polling() -> PollingSettings {
    PollingSettings {
        interval: Duration::from_millis(10),
        initial_data_attempts: 2,
        initial_data_wait: Duration::from_millis(5),
    }
}

pub async fn memory_store() -> Arc<SqliteReadingStore> {
    let store = SqliteReadingStore::in_memory().unwrap();
    store.init().await.unwrap();
    Arc::new(store)
}
