//! TLCP (Lightstreamer text protocol) framing over WebSocket.
//!
//! Requests are sent one per WebSocket message as `<verb>\r\n<params>`.
//! Server frames may bundle several `\r\n` separated notifications.

use crate::error::{Error, Result};
use crate::interfaces::feed_transport::SubscriptionRequest;

pub const WS_SUBPROTOCOL: &str = "TLCP-2.2.0.lightstreamer.com";
pub const WS_PATH: &str = "/lightstreamer";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServerMessage {
    WsOk,
    ConOk {
        session_id: String,
        request_limit: u64,
        keepalive_ms: u64,
        control_link: String,
    },
    ConErr { code: i32, message: String },
    End { code: i32, message: String },
    Loop { expected_delay_ms: u64 },
    ReqOk { request_id: Option<u64> },
    ReqErr { request_id: u64, code: i32, message: String },
    Error { code: i32, message: String },
    SubOk { sub_id: u32, items: u32, fields: u32 },
    Unsub { sub_id: u32 },
    EndOfSnapshot { sub_id: u32, item: u32 },
    ClearSnapshot { sub_id: u32, item: u32 },
    Update { sub_id: u32, item: u32, values: String },
    Probe,
    Noop,
    Sync { seconds: u64 },
    /// PROG, CONS, SERVNAME, CLIENTIP and anything newer servers may send.
    Other { tag: String },
}

pub fn split_frame(frame: &str) -> impl Iterator<Item = &str> {
    frame.split("\r\n").filter(|line| !line.is_empty())
}

pub fn parse_line(line: &str) -> Result<ServerMessage> {
    let line = line.trim_end_matches(['\r', '\n']);
    let (tag, rest) = match line.split_once(',') {
        Some((tag, rest)) => (tag, rest),
        None => (line, ""),
    };

    let msg = match tag {
        "WSOK" => ServerMessage::WsOk,
        "CONOK" => {
            let args = args(rest, 4)?;
            ServerMessage::ConOk {
                session_id: args[0].to_string(),
                request_limit: number(tag, args[1])?,
                keepalive_ms: number(tag, args[2])?,
                control_link: args[3].to_string(),
            }
        }
        "CONERR" => {
            let (code, message) = code_and_message(tag, rest)?;
            ServerMessage::ConErr { code, message }
        }
        "END" => {
            let (code, message) = code_and_message(tag, rest)?;
            ServerMessage::End { code, message }
        }
        "ERROR" => {
            let (code, message) = code_and_message(tag, rest)?;
            ServerMessage::Error { code, message }
        }
        "LOOP" => ServerMessage::Loop {
            expected_delay_ms: number(tag, rest)?,
        },
        "REQOK" => ServerMessage::ReqOk {
            request_id: if rest.is_empty() { None } else { Some(number(tag, rest)?) },
        },
        "REQERR" => {
            let args = args(rest, 3)?;
            ServerMessage::ReqErr {
                request_id: number(tag, args[0])?,
                code: number(tag, args[1])?,
                message: decode(args[2])?,
            }
        }
        "SUBOK" => {
            let args = args(rest, 3)?;
            ServerMessage::SubOk {
                sub_id: number(tag, args[0])?,
                items: number(tag, args[1])?,
                fields: number(tag, args[2])?,
            }
        }
        "UNSUB" => ServerMessage::Unsub { sub_id: number(tag, rest)? },
        "EOS" => {
            let args = args(rest, 2)?;
            ServerMessage::EndOfSnapshot {
                sub_id: number(tag, args[0])?,
                item: number(tag, args[1])?,
            }
        }
        "CS" => {
            let args = args(rest, 2)?;
            ServerMessage::ClearSnapshot {
                sub_id: number(tag, args[0])?,
                item: number(tag, args[1])?,
            }
        }
        "U" => {
            // Values may themselves contain commas, so only split twice.
            let mut parts = rest.splitn(3, ',');
            let sub_id = parts.next().unwrap_or_default();
            let item = parts.next().unwrap_or_default();
            let values = parts
                .next()
                .ok_or_else(|| Error::ProtocolError(format!("truncated update: {}", line)))?;
            ServerMessage::Update {
                sub_id: number(tag, sub_id)?,
                item: number(tag, item)?,
                values: values.to_string(),
            }
        }
        "PROBE" => ServerMessage::Probe,
        "NOOP" => ServerMessage::Noop,
        "SYNC" => ServerMessage::Sync { seconds: number(tag, rest)? },
        other => ServerMessage::Other { tag: other.to_string() },
    };

    Ok(msg)
}

fn args(rest: &str, count: usize) -> Result<Vec<&str>> {
    let args: Vec<&str> = rest.splitn(count, ',').collect();
    if args.len() != count {
        return Err(Error::ProtocolError(format!(
            "expected {} arguments, got {}: {}",
            count,
            args.len(),
            rest
        )));
    }
    Ok(args)
}

fn number<T: std::str::FromStr>(tag: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| Error::ProtocolError(format!("{}: invalid number {:?}", tag, raw)))
}

fn code_and_message(tag: &str, rest: &str) -> Result<(i32, String)> {
    let args = args(rest, 2)?;
    Ok((number(tag, args[0])?, decode(args[1])?))
}

fn decode(raw: &str) -> Result<String> {
    urlencoding::decode(raw)
        .map(|s| s.into_owned())
        .map_err(|e| Error::ProtocolError(format!("invalid percent-encoding: {}", e)))
}

/// One field position inside a `U` notification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldDelta {
    Unchanged(usize),
    Null,
    Value(String),
}

pub fn decode_update_values(raw: &str) -> Result<Vec<FieldDelta>> {
    raw.split('|')
        .map(|token| match token {
            "" => Ok(FieldDelta::Unchanged(1)),
            "#" => Ok(FieldDelta::Null),
            "$" => Ok(FieldDelta::Value(String::new())),
            t if t.starts_with('^') && t.len() > 1 && t[1..].bytes().all(|b| b.is_ascii_digit()) => {
                Ok(FieldDelta::Unchanged(number("U", &t[1..])?))
            }
            t => decode(t).map(FieldDelta::Value),
        })
        .collect()
}

/// Merge-mode field state of a single item.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MergeState {
    fields: Vec<Option<String>>,
}

impl MergeState {
    pub fn new(field_count: usize) -> Self {
        MergeState {
            fields: vec![None; field_count],
        }
    }

    pub fn apply(&mut self, deltas: &[FieldDelta]) -> Result<()> {
        let mut cursor = 0usize;
        for delta in deltas {
            match delta {
                FieldDelta::Unchanged(n) => {
                    cursor = cursor
                        .checked_add(*n)
                        .filter(|c| *c <= self.fields.len())
                        .ok_or_else(|| Error::ProtocolError(format!("skip of {} fields overruns schema", n)))?;
                }
                FieldDelta::Null => {
                    self.slot(cursor)?.take();
                    cursor += 1;
                }
                FieldDelta::Value(v) => {
                    *self.slot(cursor)? = Some(v.clone());
                    cursor += 1;
                }
            }
        }

        if cursor != self.fields.len() {
            return Err(Error::ProtocolError(format!(
                "update covers {} fields, schema has {}",
                cursor,
                self.fields.len()
            )));
        }
        Ok(())
    }

    pub fn clear(&mut self) {
        self.fields.iter_mut().for_each(|f| *f = None);
    }

    pub fn fields(&self) -> &[Option<String>] {
        &self.fields
    }

    fn slot(&mut self, index: usize) -> Result<&mut Option<String>> {
        let count = self.fields.len();
        self.fields
            .get_mut(index)
            .ok_or_else(|| Error::ProtocolError(format!("field {} out of range ({})", index + 1, count)))
    }
}

// Client requests

pub fn create_session_request(adapter_set: &str, client_id: &str) -> String {
    format!(
        "create_session\r\nLS_cid={}&LS_adapter_set={}&LS_send_sync=false&LS_cause=api",
        urlencoding::encode(client_id),
        urlencoding::encode(adapter_set),
    )
}

pub fn subscribe_request(request_id: u64, sub_id: u32, request: &SubscriptionRequest) -> String {
    format!(
        "control\r\nLS_reqId={}&LS_op=add&LS_subId={}&LS_mode={}&LS_group={}&LS_schema={}&LS_snapshot={}",
        request_id,
        sub_id,
        request.mode.as_str(),
        urlencoding::encode(&request.items.join(" ")),
        urlencoding::encode(&request.fields.join(" ")),
        request.snapshot,
    )
}

pub fn unsubscribe_request(request_id: u64, sub_id: u32) -> String {
    format!("control\r\nLS_reqId={}&LS_op=delete&LS_subId={}", request_id, sub_id)
}

pub fn destroy_request(request_id: u64) -> String {
    format!(
        "control\r\nLS_reqId={}&LS_op=destroy&LS_close_socket=true&LS_cause=api",
        request_id
    )
}

/// Map an `http(s)://` server address to its TLCP WebSocket endpoint.
pub fn websocket_url(server_url: &str) -> String {
    let base = server_url.trim_end_matches('/');
    let base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        base.to_string()
    };
    format!("{}{}", base, WS_PATH)
}
