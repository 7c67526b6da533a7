use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{FutureExt, SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use crate::config::FeedConfig;
use crate::error::{Error, Result};
use crate::interfaces::feed_transport::{
    FeedListener, FeedSession, FeedTransport, ItemUpdate, SessionStatus, SubscriptionId,
    SubscriptionRequest,
};
use crate::telemetry::lightstreamer::protocol::{self, MergeState, ServerMessage};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Grace period on top of the server keepalive before the link counts as stalled.
const STALL_MARGIN: Duration = Duration::from_secs(1);

/// Lightstreamer client speaking TLCP over a single WebSocket.
pub struct LightstreamerTransport {
    ws_url: String,
    adapter_set: String,
    client_id: String,
}

impl LightstreamerTransport {
    pub fn new(config: &FeedConfig) -> Self {
        LightstreamerTransport {
            ws_url: protocol::websocket_url(&config.server_url),
            adapter_set: config.adapter_set.clone(),
            client_id: config.client_id.clone(),
        }
    }

    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }
}

#[async_trait]
impl FeedTransport for LightstreamerTransport {
    async fn open(&self, listener: Arc<dyn FeedListener>) -> Result<Box<dyn FeedSession>> {
        listener.on_status_change(SessionStatus::Connecting);
        tracing::debug!("Opening Lightstreamer session at {} (adapter set {})", self.ws_url, self.adapter_set);

        let mut request = self.ws_url.as_str()
            .into_client_request()
            .map_err(|e| Error::ConnectionFailed(format!("invalid endpoint {}: {}", self.ws_url, e)))?;
        request.headers_mut().insert(
            "Sec-WebSocket-Protocol",
            HeaderValue::from_static(protocol::WS_SUBPROTOCOL),
        );

        let (ws_stream, _) = connect_async(request)
            .await
            .map_err(|e| Error::WebSocketError(format!("WebSocket connection failed: {}", e)))?;
        let (mut sink, stream) = ws_stream.split();

        sink.send(Message::Text("wsok".to_string()))
            .await
            .map_err(|e| Error::WebSocketError(e.to_string()))?;
        sink.send(Message::Text(protocol::create_session_request(&self.adapter_set, &self.client_id)))
            .await
            .map_err(|e| Error::WebSocketError(e.to_string()))?;

        let subscriptions: Arc<Mutex<HashMap<u32, SubscriptionState>>> = Arc::new(Mutex::new(HashMap::new()));
        let reader = tokio::spawn(read_loop(stream, listener, subscriptions.clone()));

        Ok(Box::new(LightstreamerSession {
            sink,
            subscriptions,
            reader,
            next_request_id: 1,
            next_sub_id: 1,
        }))
    }
}

struct SubscriptionState {
    items: Vec<String>,
    fields: Vec<String>,
    merged: Vec<MergeState>,
}

impl SubscriptionState {
    fn new(request: &SubscriptionRequest) -> Self {
        SubscriptionState {
            items: request.items.clone(),
            fields: request.fields.clone(),
            merged: vec![MergeState::new(request.fields.len()); request.items.len()],
        }
    }

    /// Apply a `U` notification and return the item's full field state.
    fn apply(&mut self, item: u32, raw: &str) -> Result<ItemUpdate> {
        let index = (item as usize)
            .checked_sub(1)
            .filter(|i| *i < self.items.len())
            .ok_or_else(|| Error::ProtocolError(format!("unknown item index {}", item)))?;

        let deltas = protocol::decode_update_values(raw)?;
        let state = &mut self.merged[index];
        state.apply(&deltas)?;

        Ok(ItemUpdate {
            item_name: self.items[index].clone(),
            fields: self.fields.iter().cloned().zip(state.fields().iter().cloned()).collect(),
        })
    }
}

pub struct LightstreamerSession {
    sink: WsSink,
    subscriptions: Arc<Mutex<HashMap<u32, SubscriptionState>>>,
    reader: JoinHandle<()>,
    next_request_id: u64,
    next_sub_id: u32,
}

impl LightstreamerSession {
    async fn send(&mut self, text: String) -> Result<()> {
        if self.reader.is_finished() {
            return Err(Error::ConnectionClosed);
        }
        self.sink
            .send(Message::Text(text))
            .await
            .map_err(|e| Error::WebSocketError(e.to_string()))
    }

    fn request_id(&mut self) -> u64 {
        let id = self.next_request_id;
        self.next_request_id += 1;
        id
    }
}

#[async_trait]
impl FeedSession for LightstreamerSession {
    async fn subscribe(&mut self, request: SubscriptionRequest) -> Result<SubscriptionId> {
        let sub_id = self.next_sub_id;
        self.next_sub_id += 1;

        if let Ok(mut subs) = self.subscriptions.lock() {
            subs.insert(sub_id, SubscriptionState::new(&request));
        }

        let request_id = self.request_id();
        self.send(protocol::subscribe_request(request_id, sub_id, &request)).await?;
        tracing::info!("Subscribed to {:?} ({} mode)", request.items, request.mode.as_str());
        Ok(SubscriptionId(sub_id))
    }

    async fn unsubscribe(&mut self, id: SubscriptionId) -> Result<()> {
        if let Ok(mut subs) = self.subscriptions.lock() {
            subs.remove(&id.0);
        }

        let request_id = self.request_id();
        self.send(protocol::unsubscribe_request(request_id, id.0)).await
    }

    async fn disconnect(&mut self) -> Result<()> {
        let request_id = self.request_id();
        let destroy = self.send(protocol::destroy_request(request_id)).await;

        let close = self.sink.close().await;
        self.reader.abort();

        destroy?;
        close.map_err(|e| Error::WebSocketError(e.to_string()))
    }
}

impl Drop for LightstreamerSession {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_loop(
    stream: SplitStream<WsStream>,
    listener: Arc<dyn FeedListener>,
    subscriptions: Arc<Mutex<HashMap<u32, SubscriptionState>>>,
) {
    let final_status = AssertUnwindSafe(read_frames(stream, listener.as_ref(), &subscriptions))
        .catch_unwind()
        .await
        .unwrap_or_else(|_| {
            tracing::error!("Lightstreamer reader panicked");
            SessionStatus::Disconnected(Some("WILL-RETRY".to_string()))
        });

    listener.on_status_change(final_status);
}

/// Read frames until the session ends. Once CONOK announces a keepalive, a
/// silence longer than keepalive plus [`STALL_MARGIN`] counts as a dead link.
async fn read_frames(
    mut stream: SplitStream<WsStream>,
    listener: &dyn FeedListener,
    subscriptions: &Mutex<HashMap<u32, SubscriptionState>>,
) -> SessionStatus {
    let mut keepalive: Option<Duration> = None;

    loop {
        let next = match keepalive {
            Some(keepalive) => match timeout(keepalive + STALL_MARGIN, stream.next()).await {
                Ok(next) => next,
                Err(_) => {
                    tracing::warn!("No data from Lightstreamer for {:?}, dropping session", keepalive + STALL_MARGIN);
                    return SessionStatus::Disconnected(Some("WILL-RETRY".to_string()));
                }
            },
            None => stream.next().await,
        };

        let text = match next {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Close(frame))) => {
                tracing::debug!("Lightstreamer socket closed: {:?}", frame);
                return SessionStatus::Disconnected(None);
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                tracing::warn!("Lightstreamer socket error: {}", e);
                return SessionStatus::Disconnected(Some("WILL-RETRY".to_string()));
            }
            None => return SessionStatus::Disconnected(None),
        };

        if let Some(status) = dispatch_frame(&text, listener, subscriptions, &mut keepalive) {
            return status;
        }
    }
}

/// Handle one server frame. Returns the closing status when the session ended.
fn dispatch_frame(
    frame: &str,
    listener: &dyn FeedListener,
    subscriptions: &Mutex<HashMap<u32, SubscriptionState>>,
    keepalive: &mut Option<Duration>,
) -> Option<SessionStatus> {
    for line in protocol::split_frame(frame) {
        let msg = match protocol::parse_line(line) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!("Discarding malformed TLCP line {:?}: {}", line, e);
                continue;
            }
        };

        match msg {
            ServerMessage::WsOk => tracing::debug!("WebSocket accepted by server"),
            ServerMessage::ConOk { session_id, keepalive_ms, .. } => {
                tracing::debug!("Session {} created (keepalive {}ms)", session_id, keepalive_ms);
                *keepalive = Some(Duration::from_millis(keepalive_ms));
                listener.on_status_change(SessionStatus::ws_streaming());
            }
            ServerMessage::ConErr { code, message } => {
                listener.on_status_change(SessionStatus::Error(format!("{} {}", code, message)));
                return Some(SessionStatus::Disconnected(None));
            }
            ServerMessage::End { code, message } => {
                tracing::warn!("Session ended by server: {} {}", code, message);
                return Some(SessionStatus::Disconnected(None));
            }
            ServerMessage::Loop { .. } => {
                return Some(SessionStatus::Disconnected(Some("WILL-RETRY".to_string())));
            }
            ServerMessage::Error { code, message } => {
                listener.on_status_change(SessionStatus::Error(format!("{} {}", code, message)));
            }
            ServerMessage::ReqErr { request_id, code, message } => {
                tracing::warn!("Request {} rejected: {} {}", request_id, code, message);
            }
            ServerMessage::SubOk { sub_id, items, fields } => {
                tracing::debug!("Subscription {} active ({} items, {} fields)", sub_id, items, fields);
            }
            ServerMessage::ClearSnapshot { sub_id, item } => {
                if let Ok(mut subs) = subscriptions.lock() {
                    if let Some(state) = subs.get_mut(&sub_id) {
                        if let Some(merged) = state.merged.get_mut((item as usize).saturating_sub(1)) {
                            merged.clear();
                        }
                    }
                }
            }
            ServerMessage::Update { sub_id, item, values } => {
                let update = match subscriptions.lock() {
                    Ok(mut subs) => match subs.get_mut(&sub_id) {
                        Some(state) => state.apply(item, &values),
                        None => {
                            tracing::debug!("Update for unknown subscription {}", sub_id);
                            continue;
                        }
                    },
                    Err(_) => continue,
                };

                match update {
                    Ok(update) => listener.on_item_update(update),
                    Err(e) => tracing::warn!("Discarding update {:?}: {}", line, e),
                }
            }
            other => tracing::trace!("Ignoring {:?}", other),
        }
    }

    None
}
