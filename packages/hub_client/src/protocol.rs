//! JSON hub protocol framing.
//!
//! Each frame is a JSON object followed by the record separator `0x1E`. A
//! single WebSocket text message may carry several frames.
//!
//! - Handshake: client sends `{"protocol":"json","version":1}`, server
//!   answers `{}` or `{"error":"..."}`.
//! - `type` 1: invocation (`target`, `arguments`, optional `invocationId`)
//! - `type` 6: ping
//! - `type` 7: close (optional `error`)
//!
//! Types 2-5 (stream items, completions, stream invocations, cancels) are
//! parsed as [`HubMessage::Other`] and ignored by the client.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TransportError;

pub const RECORD_SEPARATOR: char = '\u{1e}';

pub const PROTOCOL_NAME: &str = "json";
pub const PROTOCOL_VERSION: u32 = 1;

const TYPE_INVOCATION: u64 = 1;
const TYPE_PING: u64 = 6;
const TYPE_CLOSE: u64 = 7;

/// A call on a named channel with positional arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invocation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invocation_id: Option<String>,
    pub target: String,
    #[serde(default)]
    pub arguments: Vec<Value>,
}

impl Invocation {
    /// Non-blocking invocation: the server sends no completion for it.
    pub fn new(target: impl Into<String>, arguments: Vec<Value>) -> Self {
        Self {
            invocation_id: None,
            target: target.into(),
            arguments,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum HubMessage {
    Invocation(Invocation),
    Ping,
    Close { error: Option<String> },
    Other { message_type: u64 },
}

#[derive(Serialize)]
struct HandshakeRequest<'a> {
    protocol: &'a str,
    version: u32,
}

#[derive(Deserialize)]
struct HandshakeResponse {
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct CloseBody {
    #[serde(default)]
    error: Option<String>,
}

fn terminate(mut json: String) -> String {
    json.push(RECORD_SEPARATOR);
    json
}

pub fn encode_handshake_request() -> Result<String, TransportError> {
    let json = serde_json::to_string(&HandshakeRequest {
        protocol: PROTOCOL_NAME,
        version: PROTOCOL_VERSION,
    })?;
    Ok(terminate(json))
}

/// Split a text payload into its frames, skipping empty ones.
pub fn split_frames(payload: &str) -> impl Iterator<Item = &str> {
    payload
        .split(RECORD_SEPARATOR)
        .filter(|frame| !frame.trim().is_empty())
}

/// Check the server's handshake answer.
pub fn parse_handshake_response(frame: &str) -> Result<(), TransportError> {
    let response: HandshakeResponse = serde_json::from_str(frame)?;
    match response.error {
        Some(error) => Err(TransportError::Handshake(error)),
        None => Ok(()),
    }
}

pub fn parse_message(frame: &str) -> Result<HubMessage, TransportError> {
    let value: Value = serde_json::from_str(frame)?;
    let message_type = value
        .get("type")
        .and_then(Value::as_u64)
        .ok_or_else(|| TransportError::Protocol("frame has no numeric type".to_string()))?;

    match message_type {
        TYPE_INVOCATION => Ok(HubMessage::Invocation(serde_json::from_value(value)?)),
        TYPE_PING => Ok(HubMessage::Ping),
        TYPE_CLOSE => {
            let body: CloseBody = serde_json::from_value(value)?;
            Ok(HubMessage::Close { error: body.error })
        }
        other => Ok(HubMessage::Other {
            message_type: other,
        }),
    }
}

pub fn encode_invocation(invocation: &Invocation) -> Result<String, TransportError> {
    let mut value = serde_json::to_value(invocation)?;
    if let Value::Object(map) = &mut value {
        map.insert("type".to_string(), Value::from(TYPE_INVOCATION));
    }
    Ok(terminate(serde_json::to_string(&value)?))
}

pub fn encode_ping() -> String {
    terminate(format!("{{\"type\":{}}}", TYPE_PING))
}
