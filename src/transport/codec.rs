//! Engine.IO v4 / Socket.IO v5 text packet codec
//!
//! Only the subset needed by a websocket-only client on the default
//! namespace is implemented: text frames, no binary attachments, no
//! long-polling payload batching.
//!
//! ```text
//! engine packet:  <type>[data]          0 open, 1 close, 2 ping, 3 pong,
//!                                       4 message, 5 upgrade, 6 noop
//! socket packet:  <type>[/nsp,][ack][json]
//!                                       0 connect, 1 disconnect, 2 event,
//!                                       3 ack, 4 connect_error
//! ```

use serde::Deserialize;
use serde_json::Value;

use crate::error::{ContextformError, Result};

/// Engine.IO protocol revision requested in the handshake URL.
pub const ENGINE_IO_VERSION: u8 = 4;

/// Socket.IO CONNECT for the default namespace, wrapped in an engine message.
pub const CONNECT_FRAME: &str = "40";

/// Engine.IO pong reply to a server ping.
pub const PONG_FRAME: &str = "3";

/// Handshake data carried by the Engine.IO `open` packet.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    pub ping_interval: u64,
    pub ping_timeout: u64,
    #[serde(default)]
    pub max_payload: Option<u64>,
}

/// A decoded Engine.IO packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnginePacket {
    Open(Handshake),
    Close,
    Ping(String),
    Pong(String),
    Message(String),
    Upgrade,
    Noop,
}

/// A decoded Socket.IO packet (namespace stripped).
#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    Connect(Option<Value>),
    Disconnect,
    Event {
        name: String,
        data: Value,
        ack_id: Option<u64>,
    },
    Ack {
        ack_id: u64,
        data: Value,
    },
    ConnectError(Value),
}

/// Decode one websocket text frame into an Engine.IO packet.
///
/// # Errors
///
/// Returns [`ContextformError::Protocol`] for empty frames, unknown packet
/// types, or an unparsable `open` handshake.
pub fn decode_engine(frame: &str) -> Result<EnginePacket> {
    let mut chars = frame.chars();
    let kind = chars
        .next()
        .ok_or_else(|| ContextformError::Protocol("empty engine.io frame".to_string()))?;
    let body = chars.as_str();

    let packet = match kind {
        '0' => {
            let handshake: Handshake = serde_json::from_str(body).map_err(|e| {
                ContextformError::Protocol(format!("invalid engine.io handshake: {e}"))
            })?;
            EnginePacket::Open(handshake)
        }
        '1' => EnginePacket::Close,
        '2' => EnginePacket::Ping(body.to_string()),
        '3' => EnginePacket::Pong(body.to_string()),
        '4' => EnginePacket::Message(body.to_string()),
        '5' => EnginePacket::Upgrade,
        '6' => EnginePacket::Noop,
        other => {
            return Err(ContextformError::Protocol(format!(
                "unknown engine.io packet type '{other}'"
            ))
            .into())
        }
    };
    Ok(packet)
}

/// Decode the body of an Engine.IO `message` packet as a Socket.IO packet.
///
/// # Errors
///
/// Returns [`ContextformError::Protocol`] for unknown packet types, binary
/// packets, or malformed JSON.
pub fn decode_socket(body: &str) -> Result<SocketPacket> {
    let mut chars = body.chars();
    let kind = chars
        .next()
        .ok_or_else(|| ContextformError::Protocol("empty socket.io packet".to_string()))?;
    let mut rest = chars.as_str();

    // Namespace: "/admin," prefix. Only the default namespace is used, so
    // the name is dropped.
    if rest.starts_with('/') {
        rest = match rest.find(',') {
            Some(idx) => &rest[idx + 1..],
            None => "",
        };
    }

    let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
    let ack_id = if digits > 0 {
        rest[..digits].parse::<u64>().ok()
    } else {
        None
    };
    let json = &rest[digits..];

    let parse_json = |s: &str| -> Result<Option<Value>> {
        if s.is_empty() {
            return Ok(None);
        }
        serde_json::from_str(s)
            .map(Some)
            .map_err(|e| ContextformError::Protocol(format!("invalid socket.io JSON: {e}")).into())
    };

    let packet = match kind {
        '0' => SocketPacket::Connect(parse_json(json)?),
        '1' => SocketPacket::Disconnect,
        '2' => {
            let mut items = match parse_json(json)? {
                Some(Value::Array(items)) if !items.is_empty() => items,
                _ => {
                    return Err(ContextformError::Protocol(
                        "socket.io event must be a non-empty array".to_string(),
                    )
                    .into())
                }
            };
            let name = match items.remove(0) {
                Value::String(name) => name,
                other => {
                    return Err(ContextformError::Protocol(format!(
                        "socket.io event name must be a string, got {other}"
                    ))
                    .into())
                }
            };
            // Handlers on the backend side only ever send one argument.
            let data = if items.is_empty() {
                Value::Null
            } else {
                items.swap_remove(0)
            };
            SocketPacket::Event { name, data, ack_id }
        }
        '3' => SocketPacket::Ack {
            ack_id: ack_id.ok_or_else(|| {
                ContextformError::Protocol("socket.io ack without id".to_string())
            })?,
            data: parse_json(json)?.unwrap_or(Value::Null),
        },
        '4' => SocketPacket::ConnectError(parse_json(json)?.unwrap_or(Value::Null)),
        '5' | '6' => {
            return Err(ContextformError::Protocol(
                "binary socket.io packets are not supported".to_string(),
            )
            .into())
        }
        other => {
            return Err(ContextformError::Protocol(format!(
                "unknown socket.io packet type '{other}'"
            ))
            .into())
        }
    };
    Ok(packet)
}

/// Encode an event for the default namespace as a complete websocket frame.
///
/// # Errors
///
/// Returns [`ContextformError::Serialization`] if the payload cannot be
/// serialized.
pub fn encode_event(name: &str, data: Option<&Value>) -> Result<String> {
    let array = match data {
        Some(data) => serde_json::to_string(&(name, data))?,
        None => serde_json::to_string(&[name])?,
    };
    Ok(format!("42{array}"))
}
