//! Text packet codec for the real-time channel.
//!
//! The chat backend speaks Socket.IO v4 over a plain WebSocket. Every
//! WebSocket text frame carries one Engine.IO packet; Engine.IO `message`
//! packets in turn carry one Socket.IO packet:
//!
//! ```text
//! 0{"sid":"..","pingInterval":25000,..}   engine open
//! 2 / 3                                   engine ping / pong
//! 40                                      socket connect to "/"
//! 42["receiveMessage",{...}]              socket event on "/"
//! 42/admin,7["evt",1]                     event on "/admin" with ack id 7
//! ```
//!
//! Binary attachments and acknowledgement packets are not used by the chat
//! protocol and decode to [`CodecError::Unsupported`].

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The default Socket.IO namespace.
pub const DEFAULT_NAMESPACE: &str = "/";

/// Engine.IO protocol revision spoken by client and server.
pub const ENGINE_IO_VERSION: u8 = 4;

/// Error type for packet encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The frame contained no packet type.
    #[error("empty packet")]
    Empty,
    /// The packet type digit is not defined by the protocol.
    #[error("unknown packet type {0:?}")]
    UnknownType(char),
    /// The packet type is valid but not used by the chat protocol.
    #[error("unsupported packet type {0:?}")]
    Unsupported(char),
    /// The packet structure is invalid.
    #[error("malformed packet: {0}")]
    Malformed(String),
    /// The JSON body could not be parsed or produced.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Handshake parameters sent by the server in the Engine.IO `open` packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenInfo {
    /// Engine session id.
    pub sid: String,
    /// Transports the server would upgrade to (empty for WebSocket-only).
    #[serde(default)]
    pub upgrades: Vec<String>,
    /// Interval between server pings, in milliseconds.
    pub ping_interval: u64,
    /// How long the server waits for a pong, in milliseconds.
    pub ping_timeout: u64,
    /// Maximum accepted payload size in bytes.
    #[serde(default)]
    pub max_payload: u64,
}

/// A Socket.IO packet carried inside an Engine.IO `message`.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    /// Namespace connect request (client) or confirmation (server).
    Connect {
        /// Target namespace.
        namespace: String,
        /// Optional auth payload (client) or `{ "sid": .. }` (server).
        data: Option<Value>,
    },
    /// Namespace disconnect.
    Disconnect {
        /// Namespace being left.
        namespace: String,
    },
    /// A named event with arguments.
    Event {
        /// Namespace the event belongs to.
        namespace: String,
        /// Event name (first element of the JSON array).
        name: String,
        /// Remaining elements of the JSON array.
        args: Vec<Value>,
        /// Acknowledgement id requested by the sender, if any.
        ack: Option<u64>,
    },
    /// The server refused the namespace connection.
    ConnectError {
        /// Namespace that was refused.
        namespace: String,
        /// Error payload, usually `{ "message": .. }`.
        data: Value,
    },
}

/// One Engine.IO packet, i.e. one WebSocket text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    /// Server handshake.
    Open(OpenInfo),
    /// Transport close.
    Close,
    /// Heartbeat request (server to client in v4).
    Ping,
    /// Heartbeat reply.
    Pong,
    /// Socket.IO payload.
    Message(SocketPacket),
    /// No-op, used during transport upgrades.
    Noop,
}

impl Packet {
    /// Build the client's connect request for the default namespace.
    #[must_use]
    pub const fn connect() -> Self {
        Self::Message(SocketPacket::Connect {
            namespace: String::new(),
            data: None,
        })
    }

    /// Build an event packet on the default namespace with a single
    /// serializable argument.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Json`] if `payload` cannot be converted to JSON.
    pub fn event(name: &str, payload: &impl Serialize) -> Result<Self, CodecError> {
        Ok(Self::Message(SocketPacket::Event {
            namespace: DEFAULT_NAMESPACE.to_string(),
            name: name.to_string(),
            args: vec![serde_json::to_value(payload)?],
            ack: None,
        }))
    }
}

/// Normalize an empty namespace to [`DEFAULT_NAMESPACE`].
fn namespace_or_default(namespace: &str) -> &str {
    if namespace.is_empty() {
        DEFAULT_NAMESPACE
    } else {
        namespace
    }
}

/// Encodes a [`Packet`] into the text form of one WebSocket frame.
///
/// # Errors
///
/// Returns [`CodecError::Json`] if a JSON body cannot be serialized.
pub fn encode(packet: &Packet) -> Result<String, CodecError> {
    let text = match packet {
        Packet::Open(info) => format!("0{}", serde_json::to_string(info)?),
        Packet::Close => "1".to_string(),
        Packet::Ping => "2".to_string(),
        Packet::Pong => "3".to_string(),
        Packet::Noop => "6".to_string(),
        Packet::Message(socket) => format!("4{}", encode_socket(socket)?),
    };
    Ok(text)
}

fn encode_socket(packet: &SocketPacket) -> Result<String, CodecError> {
    let (kind, namespace) = match packet {
        SocketPacket::Connect { namespace, .. } => ('0', namespace),
        SocketPacket::Disconnect { namespace } => ('1', namespace),
        SocketPacket::Event { namespace, .. } => ('2', namespace),
        SocketPacket::ConnectError { namespace, .. } => ('4', namespace),
    };

    let mut out = String::new();
    out.push(kind);
    let namespace = namespace_or_default(namespace);
    if namespace != DEFAULT_NAMESPACE {
        out.push_str(namespace);
        out.push(',');
    }

    match packet {
        SocketPacket::Connect { data, .. } => {
            if let Some(data) = data {
                out.push_str(&serde_json::to_string(data)?);
            }
        }
        SocketPacket::Disconnect { .. } => {}
        SocketPacket::Event {
            name, args, ack, ..
        } => {
            if let Some(id) = ack {
                let _ = write!(out, "{id}");
            }
            let mut array = Vec::with_capacity(args.len() + 1);
            array.push(Value::String(name.clone()));
            array.extend(args.iter().cloned());
            out.push_str(&serde_json::to_string(&Value::Array(array))?);
        }
        SocketPacket::ConnectError { data, .. } => {
            out.push_str(&serde_json::to_string(data)?);
        }
    }
    Ok(out)
}

/// Decodes the text of one WebSocket frame into a [`Packet`].
///
/// # Errors
///
/// Returns a [`CodecError`] describing why the frame is not a valid packet.
/// Never panics on arbitrary input.
pub fn decode(text: &str) -> Result<Packet, CodecError> {
    let mut chars = text.chars();
    let kind = chars.next().ok_or(CodecError::Empty)?;
    let rest = chars.as_str();
    match kind {
        '0' => Ok(Packet::Open(serde_json::from_str(rest)?)),
        '1' => Ok(Packet::Close),
        // Ping and pong may carry a "probe" payload during upgrades.
        '2' => Ok(Packet::Ping),
        '3' => Ok(Packet::Pong),
        '4' => Ok(Packet::Message(decode_socket(rest)?)),
        '5' => Err(CodecError::Unsupported(kind)),
        '6' => Ok(Packet::Noop),
        other => Err(CodecError::UnknownType(other)),
    }
}

fn decode_socket(text: &str) -> Result<SocketPacket, CodecError> {
    let mut chars = text.chars();
    let kind = chars.next().ok_or(CodecError::Empty)?;
    let mut rest = chars.as_str();

    let namespace = if rest.starts_with('/') {
        let (namespace, tail) = rest.split_once(',').unwrap_or((rest, ""));
        rest = tail;
        namespace.to_string()
    } else {
        DEFAULT_NAMESPACE.to_string()
    };

    match kind {
        '0' => {
            let data = if rest.is_empty() {
                None
            } else {
                Some(serde_json::from_str(rest)?)
            };
            Ok(SocketPacket::Connect { namespace, data })
        }
        '1' => Ok(SocketPacket::Disconnect { namespace }),
        '2' => {
            let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
            let (ack_digits, body) = rest.split_at(digits);
            let ack = if ack_digits.is_empty() {
                None
            } else {
                Some(
                    ack_digits
                        .parse::<u64>()
                        .map_err(|e| CodecError::Malformed(format!("ack id: {e}")))?,
                )
            };
            let Value::Array(mut items) = serde_json::from_str::<Value>(body)? else {
                return Err(CodecError::Malformed("event body is not an array".into()));
            };
            if items.is_empty() {
                return Err(CodecError::Malformed("event array is empty".into()));
            }
            let Value::String(name) = items.remove(0) else {
                return Err(CodecError::Malformed("event name is not a string".into()));
            };
            Ok(SocketPacket::Event {
                namespace,
                name,
                args: items,
                ack,
            })
        }
        '4' => Ok(SocketPacket::ConnectError {
            namespace,
            data: serde_json::from_str(rest)?,
        }),
        '3' | '5' | '6' => Err(CodecError::Unsupported(kind)),
        other => Err(CodecError::UnknownType(other)),
    }
}
