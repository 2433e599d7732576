//! Socket.IO v5 packets carried over Engine.IO v4 text frames
//!
//! Only the subset a listening client needs is understood: the Engine.IO
//! handshake and heartbeat, namespace connect/disconnect, and plain events on
//! the default namespace. Binary events and acknowledgements are skipped.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Namespace connect request for the default namespace
pub const CONNECT: &str = "40";

/// Engine.IO close request
pub const CLOSE: &str = "1";

/// Engine.IO handshake sent by the server right after the socket opens
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    #[serde(default)]
    pub ping_interval: u64,
    #[serde(default)]
    pub ping_timeout: u64,
    #[serde(default)]
    pub max_payload: u64,
}

/// One decoded text frame
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Open(Handshake),
    Close,
    Ping(String),
    Pong(String),
    /// Namespace connect acknowledged
    Connect,
    Disconnect,
    ConnectError(String),
    Event { name: String, data: Value },
    /// Upgrade, noop, acks, binary packets and other namespaces
    Ignored,
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("empty frame")]
    Empty,

    #[error("unknown packet type '{0}'")]
    UnknownPacket(char),

    #[error("malformed event payload")]
    MalformedEvent,

    #[error("invalid JSON in frame: {0}")]
    Json(#[from] serde_json::Error),
}

/// Decode one WebSocket text frame.
pub fn decode(text: &str) -> Result<Frame, CodecError> {
    let mut chars = text.chars();
    let kind = chars.next().ok_or(CodecError::Empty)?;
    let rest = chars.as_str();
    match kind {
        '0' => Ok(Frame::Open(serde_json::from_str(rest)?)),
        '1' => Ok(Frame::Close),
        '2' => Ok(Frame::Ping(rest.to_string())),
        '3' => Ok(Frame::Pong(rest.to_string())),
        '4' => decode_socket_packet(rest),
        '5' | '6' => Ok(Frame::Ignored),
        other => Err(CodecError::UnknownPacket(other)),
    }
}

fn decode_socket_packet(text: &str) -> Result<Frame, CodecError> {
    let mut chars = text.chars();
    let kind = chars.next().ok_or(CodecError::Empty)?;
    let mut rest = chars.as_str();

    if rest.starts_with('/') {
        let (namespace, tail) = match rest.find(',') {
            Some(pos) => (&rest[..pos], &rest[pos + 1..]),
            None => (rest, ""),
        };
        if namespace != "/" {
            return Ok(Frame::Ignored);
        }
        rest = tail;
    }

    // Acknowledgement id, irrelevant for pushed events.
    let payload = rest.trim_start_matches(|c: char| c.is_ascii_digit());

    match kind {
        '0' => Ok(Frame::Connect),
        '1' => Ok(Frame::Disconnect),
        '2' => decode_event(payload),
        '4' => {
            let message = serde_json::from_str::<Value>(payload)
                .ok()
                .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
                .unwrap_or_else(|| payload.to_string());
            Ok(Frame::ConnectError(message))
        }
        '3' | '5' | '6' => Ok(Frame::Ignored),
        other => Err(CodecError::UnknownPacket(other)),
    }
}

fn decode_event(payload: &str) -> Result<Frame, CodecError> {
    let value: Value = serde_json::from_str(payload)?;
    let mut args = match value {
        Value::Array(args) => args.into_iter(),
        _ => return Err(CodecError::MalformedEvent),
    };
    let name = match args.next() {
        Some(Value::String(name)) => name,
        _ => return Err(CodecError::MalformedEvent),
    };
    let data = args.next().unwrap_or(Value::Null);
    Ok(Frame::Event { name, data })
}

/// Encode an event for the default namespace: `42["name",data]`.
pub fn encode_event(name: &str, data: &Value) -> String {
    let args = Value::Array(vec![Value::String(name.to_string()), data.clone()]);
    format!("42{}", args)
}

/// Answer a heartbeat, echoing its payload.
pub fn encode_pong(payload: &str) -> String {
    format!("3{}", payload)
}
