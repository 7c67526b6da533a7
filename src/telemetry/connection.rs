use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::Instrument;
use crate::config::FeedConfig;
use crate::error::{Error, Result};
use crate::interfaces::feed_transport::{
    FeedListener, FeedSession, FeedTransport, ItemUpdate, SessionStatus, SubscriptionId,
    SubscriptionRequest,
};
use crate::observability::metrics;
use crate::observability::tracing::trace_connection_attempt;
use crate::telemetry::signal::{resolve_once, ResolveOnce, WaitOutcome};

const STATUS_HISTORY_LIMIT: usize = 32;
const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            _ => ConnectionState::Disconnected,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ConnectionSettings {
    pub item: String,
    pub field: String,
    pub connect_timeout: Duration,
}

impl From<&FeedConfig> for ConnectionSettings {
    fn from(config: &FeedConfig) -> Self {
        ConnectionSettings {
            item: config.item.clone(),
            field: config.field.clone(),
            connect_timeout: config.connect_timeout(),
        }
    }
}

/// State shared between the manager and the transport's notification path.
struct Shared {
    item: String,
    field: String,
    state: AtomicU8,
    /// Notifications tagged with any other epoch are ignored.
    epoch: AtomicU64,
    live: watch::Sender<Option<f64>>,
    status_history: Mutex<VecDeque<String>>,
}

impl Shared {
    fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn record_status(&self, status: &SessionStatus) {
        if let Ok(mut history) = self.status_history.lock() {
            if history.len() == STATUS_HISTORY_LIMIT {
                history.pop_front();
            }
            history.push_back(status.to_string());
        }
    }

    fn history(&self) -> Vec<String> {
        self.status_history
            .lock()
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn reset_history(&self) {
        if let Ok(mut history) = self.status_history.lock() {
            history.clear();
        }
    }
}

/// Listener registered for one connection attempt.
struct SessionObserver {
    shared: Arc<Shared>,
    epoch: u64,
    outcome: ResolveOnce<bool>,
}

impl SessionObserver {
    fn is_current(&self) -> bool {
        self.shared.epoch.load(Ordering::SeqCst) == self.epoch
    }
}

impl FeedListener for SessionObserver {
    fn on_status_change(&self, status: SessionStatus) {
        if !self.is_current() {
            tracing::debug!("Ignoring status {} from a closed session", status);
            return;
        }

        self.shared.record_status(&status);
        tracing::info!("Lightstreamer connection status: {}", status);

        if status.is_streaming() {
            tracing::info!("Successfully established WebSocket streaming connection");
            self.outcome.resolve(true);
        } else if status.is_failure() {
            if !self.outcome.resolve(false) {
                // The attempt already resolved, so this is a live session dropping.
                tracing::warn!("Feed connection lost: {}", status);
                self.shared.set_state(ConnectionState::Disconnected);
            } else if let SessionStatus::Error(msg) = &status {
                tracing::error!("Connection error: {}", msg);
            } else {
                tracing::warn!("Connection disconnected: {}", status);
            }
        }
    }

    fn on_item_update(&self, update: ItemUpdate) {
        if !self.is_current() {
            return;
        }

        match parse_update(&update, &self.shared.item, &self.shared.field) {
            Ok(value) => {
                tracing::info!("Received telemetry update for {}: {}%", self.shared.item, value);
                self.shared.live.send_replace(Some(value));
                metrics::LIVE_VALUE.set(value);
                metrics::FEED_UPDATES.inc();
            }
            Err(e @ Error::InvalidValue { .. }) => {
                tracing::warn!("{}", e);
                metrics::FEED_PARSE_FAILURES.inc();
            }
            Err(e) => {
                tracing::debug!("Ignoring update: {}", e);
            }
        }
    }
}

/// Extract the monitored value from an update.
///
/// Only finite numbers are accepted, so the live value is always comparable.
pub fn parse_update(update: &ItemUpdate, item: &str, field: &str) -> Result<f64> {
    if update.item_name != item {
        return Err(Error::ProtocolError(format!(
            "update for different item {}",
            update.item_name
        )));
    }

    let raw = update
        .value(field)
        .ok_or_else(|| Error::ProtocolError(format!("null value for {}.{}", item, field)))?;

    match raw.trim().parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(Error::InvalidValue {
            item: item.to_string(),
            raw: raw.to_string(),
        }),
    }
}

struct ActiveSession {
    session: Box<dyn FeedSession>,
    subscription: Option<SubscriptionId>,
}

/// Resets a `Connecting` state left behind by a cancelled attempt.
struct ConnectingGuard<'a> {
    shared: &'a Shared,
}

impl Drop for ConnectingGuard<'_> {
    fn drop(&mut self) {
        self.shared.transition(ConnectionState::Connecting, ConnectionState::Disconnected);
    }
}

/// Owns the single subscription to the upstream push feed.
pub struct FeedConnectionManager {
    transport: Arc<dyn FeedTransport>,
    settings: ConnectionSettings,
    shared: Arc<Shared>,
    /// Guards `Disconnected -> Connecting`; holds the live session.
    session: tokio::sync::Mutex<Option<ActiveSession>>,
    completed_attempts: AtomicU64,
    last_outcome: AtomicBool,
}

impl FeedConnectionManager {
    pub fn new(transport: Arc<dyn FeedTransport>, settings: ConnectionSettings) -> Self {
        let (live, _) = watch::channel(None);

        FeedConnectionManager {
            transport,
            shared: Arc::new(Shared {
                item: settings.item.clone(),
                field: settings.field.clone(),
                state: AtomicU8::new(ConnectionState::Disconnected as u8),
                epoch: AtomicU64::new(0),
                live,
                status_history: Mutex::new(VecDeque::new()),
            }),
            settings,
            session: tokio::sync::Mutex::new(None),
            completed_attempts: AtomicU64::new(0),
            last_outcome: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Latest value pushed by the feed. Never waits on a connection attempt.
    pub fn current_value(&self) -> Option<f64> {
        *self.shared.live.borrow()
    }

    /// Receiver that observes every live value overwrite.
    pub fn watch_value(&self) -> watch::Receiver<Option<f64>> {
        self.shared.live.subscribe()
    }

    /// Status notifications seen during the latest connection attempt.
    pub fn status_history(&self) -> Vec<String> {
        self.shared.history()
    }

    pub fn item(&self) -> &str {
        &self.settings.item
    }

    pub fn connection_attempts(&self) -> u64 {
        self.completed_attempts.load(Ordering::SeqCst)
    }

    /// Connect unless already connected. Callers arriving while an attempt is
    /// in flight share that attempt's outcome.
    pub async fn ensure_connected(&self) -> bool {
        if self.is_connected() {
            return true;
        }

        let seen_attempts = self.completed_attempts.load(Ordering::SeqCst);
        let mut slot = self.session.lock().await;

        if self.is_connected() {
            return true;
        }
        if self.completed_attempts.load(Ordering::SeqCst) != seen_attempts {
            return self.last_outcome.load(Ordering::SeqCst);
        }

        let attempt = seen_attempts + 1;
        let outcome = self
            .connect(&mut slot)
            .instrument(trace_connection_attempt(attempt, &self.settings.item))
            .await;

        self.last_outcome.store(outcome, Ordering::SeqCst);
        self.completed_attempts.fetch_add(1, Ordering::SeqCst);
        outcome
    }

    async fn connect(&self, slot: &mut Option<ActiveSession>) -> bool {
        metrics::CONNECTION_ATTEMPTS.inc();

        if let Some(stale) = slot.take() {
            tracing::debug!("Releasing dropped feed session before reconnecting");
            teardown(stale).await;
        }

        let epoch = self.shared.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.reset_history();
        self.shared.set_state(ConnectionState::Connecting);
        let _guard = ConnectingGuard { shared: &self.shared };

        let (outcome, resolution) = resolve_once();
        let observer = Arc::new(SessionObserver {
            shared: self.shared.clone(),
            epoch,
            outcome,
        });

        let timeout = self.settings.connect_timeout;
        let deadline = Instant::now() + timeout;
        tracing::info!("Attempting to connect to telemetry stream, waiting up to {:?}", timeout);

        let mut session = match tokio::time::timeout_at(deadline, self.transport.open(observer)).await {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => {
                tracing::error!("Exception during feed connection: {}", e);
                return self.fail();
            }
            Err(_) => {
                tracing::error!(
                    "Connection timed out after {:?}. Status history: {:?}",
                    timeout,
                    self.shared.history()
                );
                return self.fail();
            }
        };

        match resolution.wait_until(deadline).await {
            WaitOutcome::Resolved(true) => {}
            WaitOutcome::Resolved(false) | WaitOutcome::Abandoned => {
                tracing::error!("Connection failed. Status history: {:?}", self.shared.history());
                teardown(ActiveSession { session, subscription: None }).await;
                return self.fail();
            }
            WaitOutcome::TimedOut => {
                tracing::error!(
                    "Connection timed out after {:?}. Status history: {:?}",
                    timeout,
                    self.shared.history()
                );
                teardown(ActiveSession { session, subscription: None }).await;
                return self.fail();
            }
        }

        if !self.shared.transition(ConnectionState::Connecting, ConnectionState::Connected) {
            tracing::warn!("Feed session dropped while connecting. Status history: {:?}", self.shared.history());
            teardown(ActiveSession { session, subscription: None }).await;
            return self.fail();
        }

        tracing::info!("Connection established, setting up telemetry subscription for {}", self.settings.item);
        let request = SubscriptionRequest::merge(&self.settings.item, &self.settings.field);
        match session.subscribe(request).await {
            Ok(id) => {
                *slot = Some(ActiveSession { session, subscription: Some(id) });
                tracing::info!("Connected to telemetry stream and subscribed to {}", self.settings.item);
                true
            }
            Err(e) => {
                tracing::error!("Failed to subscribe to {}: {}", self.settings.item, e);
                teardown(ActiveSession { session, subscription: None }).await;
                self.fail()
            }
        }
    }

    fn fail(&self) -> bool {
        metrics::CONNECTION_FAILURES.inc();
        self.shared.set_state(ConnectionState::Disconnected);
        false
    }

    /// Drop the subscription and session. Safe to call in any state.
    pub async fn disconnect(&self) {
        // Stop applying notifications before anything else.
        self.shared.epoch.fetch_add(1, Ordering::SeqCst);

        let mut slot = self.session.lock().await;
        if let Some(active) = slot.take() {
            tracing::info!("Disconnecting from telemetry stream");
            teardown(active).await;
        }
        self.shared.set_state(ConnectionState::Disconnected);
    }
}

/// Best-effort release of a session; failures are only logged.
async fn teardown(mut active: ActiveSession) {
    let release = async {
        if let Some(id) = active.subscription.take() {
            if let Err(e) = active.session.unsubscribe(id).await {
                tracing::debug!("Error during unsubscribe: {}", e);
            }
        }
        if let Err(e) = active.session.disconnect().await {
            tracing::debug!("Error during disconnect cleanup: {}", e);
        }
    };

    if tokio::time::timeout(TEARDOWN_TIMEOUT, release).await.is_err() {
        tracing::debug!("Session teardown timed out after {:?}", TEARDOWN_TIMEOUT);
    }
}
