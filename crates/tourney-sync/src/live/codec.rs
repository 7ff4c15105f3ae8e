// Engine.IO v4 / Socket.IO v5 text framing.
//
// One WebSocket text frame carries one Engine.IO packet. Engine.IO type `4`
// ("message") wraps a Socket.IO packet whose first digit is its own type.
// Only the default namespace and text payloads are used by the backend.

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("empty frame")]
    Empty,

    #[error("unknown packet type: {0}")]
    UnknownType(char),

    #[error("binary packets are not supported")]
    Unsupported,

    #[error("malformed payload: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    /// Engine.IO handshake (`0{sid,...}`).
    Open(Value),
    Close,
    Ping,
    Pong,
    /// Socket.IO namespace connect. Carries the server's `{sid}` when inbound.
    Connect(Option<Value>),
    Disconnect,
    Event {
        name: String,
        payload: Value,
        ack: Option<u64>,
    },
    Ack,
    ConnectError(Value),
    /// Engine.IO upgrade/noop frames; nothing to do.
    Noop,
}

impl Packet {
    pub fn decode(frame: &str) -> Result<Packet, CodecError> {
        let mut chars = frame.chars();
        let engine_type = chars.next().ok_or(CodecError::Empty)?;
        let rest = chars.as_str();

        match engine_type {
            '0' => Ok(Packet::Open(parse_json(rest)?)),
            '1' => Ok(Packet::Close),
            '2' => Ok(Packet::Ping),
            '3' => Ok(Packet::Pong),
            '4' => decode_socket(rest),
            '5' | '6' => Ok(Packet::Noop),
            other => Err(CodecError::UnknownType(other)),
        }
    }
}

/// Frames the client writes: the namespace connect, pong replies and
/// room events.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Connect,
    Pong,
    Event { name: String, payload: Value },
}

impl Outbound {
    pub fn event(name: impl Into<String>, payload: Value) -> Self {
        Self::Event {
            name: name.into(),
            payload,
        }
    }

    pub fn encode(&self) -> String {
        match self {
            Outbound::Connect => "40".to_string(),
            Outbound::Pong => "3".to_string(),
            Outbound::Event { name, payload } => {
                let body = Value::Array(vec![Value::String(name.clone()), payload.clone()]);
                format!("42{body}")
            }
        }
    }
}

fn parse_json(s: &str) -> Result<Value, CodecError> {
    serde_json::from_str(s).map_err(|e| CodecError::Malformed(e.to_string()))
}

fn decode_socket(packet: &str) -> Result<Packet, CodecError> {
    let mut chars = packet.chars();
    let socket_type = chars.next().ok_or(CodecError::Empty)?;
    let mut rest = chars.as_str();

    // Optional namespace: "/name," precedes the ack id and payload.
    if rest.starts_with('/') {
        rest = match rest.find(',') {
            Some(idx) => &rest[idx + 1..],
            None => "",
        };
    }

    let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
    let (ack_str, data) = rest.split_at(digits);
    let ack = if ack_str.is_empty() {
        None
    } else {
        Some(
            ack_str
                .parse::<u64>()
                .map_err(|e| CodecError::Malformed(e.to_string()))?,
        )
    };

    match socket_type {
        '0' if data.is_empty() => Ok(Packet::Connect(None)),
        '0' => Ok(Packet::Connect(Some(parse_json(data)?))),
        '1' => Ok(Packet::Disconnect),
        '2' => {
            let Value::Array(mut items) = parse_json(data)? else {
                return Err(CodecError::Malformed("event body is not an array".into()));
            };
            if items.is_empty() {
                return Err(CodecError::Malformed("event without a name".into()));
            }
            let name = match items.remove(0) {
                Value::String(s) => s,
                other => return Err(CodecError::Malformed(format!("event name {other}"))),
            };
            let payload = if items.is_empty() {
                Value::Null
            } else {
                items.remove(0)
            };
            Ok(Packet::Event { name, payload, ack })
        }
        '3' => Ok(Packet::Ack),
        '4' => Ok(Packet::ConnectError(if data.is_empty() {
            Value::Null
        } else {
            parse_json(data)?
        })),
        '5' | '6' => Err(CodecError::Unsupported),
        other => Err(CodecError::UnknownType(other)),
    }
}
