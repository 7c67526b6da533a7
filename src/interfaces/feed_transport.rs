use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use async_trait::async_trait;
use serde::Serialize;
use crate::error::Result;

/// Session status notifications, rendered the way Lightstreamer clients report them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum SessionStatus {
    Connecting,
    /// Carries the transport, e.g. `WS-STREAMING`.
    Connected(String),
    /// Carries the optional qualifier, e.g. `WILL-RETRY`.
    Disconnected(Option<String>),
    Error(String),
}

impl SessionStatus {
    pub const WS_STREAMING: &'static str = "WS-STREAMING";

    pub fn ws_streaming() -> Self {
        SessionStatus::Connected(Self::WS_STREAMING.to_string())
    }

    /// Streaming is fully established.
    pub fn is_streaming(&self) -> bool {
        matches!(self, SessionStatus::Connected(t) if t == Self::WS_STREAMING)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, SessionStatus::Disconnected(_) | SessionStatus::Error(_))
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Connecting => write!(f, "CONNECTING"),
            SessionStatus::Connected(transport) => write!(f, "CONNECTED:{}", transport),
            SessionStatus::Disconnected(None) => write!(f, "DISCONNECTED"),
            SessionStatus::Disconnected(Some(q)) => write!(f, "DISCONNECTED:{}", q),
            SessionStatus::Error(msg) => write!(f, "ERROR:{}", msg),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscriptionMode {
    Merge,
}

impl SubscriptionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionMode::Merge => "MERGE",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscriptionRequest {
    pub mode: SubscriptionMode,
    pub items: Vec<String>,
    pub fields: Vec<String>,
    pub snapshot: bool,
}

impl SubscriptionRequest {
    pub fn merge(item: &str, field: &str) -> Self {
        SubscriptionRequest {
            mode: SubscriptionMode::Merge,
            items: vec![item.to_string()],
            fields: vec![field.to_string()],
            snapshot: true,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u32);

/// Full current field state of one item after a merge-mode update.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ItemUpdate {
    pub item_name: String,
    pub fields: HashMap<String, Option<String>>,
}

impl ItemUpdate {
    pub fn value(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(|v| v.as_deref())
    }
}

/// Receives notifications from the transport's own I/O task.
pub trait FeedListener: Send + Sync {
    fn on_status_change(&self, status: SessionStatus);
    fn on_item_update(&self, update: ItemUpdate);
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FeedTransport: Send + Sync {
    /// Open a client session and start connecting. Status changes and item
    /// updates flow to `listener` until the session is disconnected.
    async fn open(&self, listener: Arc<dyn FeedListener>) -> Result<Box<dyn FeedSession>>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FeedSession: Send {
    async fn subscribe(&mut self, request: SubscriptionRequest) -> Result<SubscriptionId>;

    async fn unsubscribe(&mut self, id: SubscriptionId) -> Result<()>;

    async fn disconnect(&mut self) -> Result<()>;
}
