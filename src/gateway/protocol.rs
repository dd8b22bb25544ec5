//! OpenClaw gateway wire frames.
//!
//! Every frame is a JSON text message with a `type` discriminator:
//!
//! | Direction | `type`          | Shape                                          |
//! |-----------|-----------------|------------------------------------------------|
//! | out       | `req`           | `{id, method, params}`                         |
//! | out       | `tool.response` | `{id, result}`                                 |
//! | in        | `event`         | `{event, payload}`                             |
//! | in        | `res`           | `{id \| reply_to, ok, payload, error?, end?}`  |
//! | in        | `tool.request`  | `{id, tool, arguments}`                        |
//!
//! The earlier `message.response` / `message.chunk` / `message.end` / `error`
//! frames are still accepted and decoded into [`Response`] so the rest of the
//! session only deals with one reply shape.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::error::GatewayError;

// ── Constants ──────────────────────────────────────────────────────

/// Protocol revision spoken by this client (both min and max).
pub const PROTOCOL_VERSION: u32 = 3;

/// Client id accepted by the gateway for backend integrations.
pub const CLIENT_ID: &str = "gateway-client";
pub const CLIENT_MODE: &str = "backend";
pub const CLIENT_ROLE: &str = "operator";

pub const EVENT_CHALLENGE: &str = "connect.challenge";
pub const EVENT_ACCEPTED: &str = "connect.accepted";
pub const EVENT_REJECTED: &str = "connect.rejected";

/// `payload.type` of the handshake acknowledgment.
pub const HELLO_OK: &str = "hello-ok";

/// Payload fields tried in order when extracting reply text.
pub const TEXT_FIELDS: [&str; 2] = ["text", "content"];

// ── Outbound ───────────────────────────────────────────────────────

/// `{type:"req", id, method, params}`
#[derive(Debug, Serialize)]
pub struct RequestFrame<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    pub id: &'a str,
    pub method: &'a str,
    pub params: &'a Value,
}

impl<'a> RequestFrame<'a> {
    pub fn new(id: &'a str, method: &'a str, params: &'a Value) -> Self {
        Self {
            kind: "req",
            id,
            method,
            params,
        }
    }

    pub fn to_text(&self) -> Result<String, GatewayError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// `{type:"tool.response", id, result}`
#[derive(Debug, Serialize)]
pub struct ToolResponseFrame<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    pub id: &'a str,
    pub result: &'a Value,
}

impl<'a> ToolResponseFrame<'a> {
    pub fn new(id: &'a str, result: &'a Value) -> Self {
        Self {
            kind: "tool.response",
            id,
            result,
        }
    }

    pub fn to_text(&self) -> Result<String, GatewayError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Parameters of the `connect` request sent in answer to a challenge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    pub min_protocol: u32,
    pub max_protocol: u32,
    pub client: ClientInfo,
    pub role: String,
    pub auth: ConnectAuth,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub id: String,
    pub version: String,
    pub platform: String,
    pub mode: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectAuth {
    pub token: String,
}

impl ConnectParams {
    /// Build connect params; a missing token is sent as an empty string.
    pub fn new(token: Option<&str>) -> Self {
        Self {
            min_protocol: PROTOCOL_VERSION,
            max_protocol: PROTOCOL_VERSION,
            client: ClientInfo {
                id: CLIENT_ID.into(),
                version: env!("CARGO_PKG_VERSION").into(),
                platform: std::env::consts::OS.into(),
                mode: CLIENT_MODE.into(),
            },
            role: CLIENT_ROLE.into(),
            auth: ConnectAuth {
                token: token.unwrap_or_default().to_string(),
            },
        }
    }
}

// ── Inbound ────────────────────────────────────────────────────────

/// Reply to one of our requests (or one chunk of a streamed reply).
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Identifier of the request this answers (`id` or `reply_to`).
    pub id: String,
    pub ok: bool,
    /// `None` for frames that only carry an end marker.
    pub payload: Option<Value>,
    /// Error text when `ok` is false.
    pub error: Option<String>,
    /// Explicit end-of-stream signal.
    pub end: bool,
}

impl Response {
    /// `payload.type`, used to spot the handshake acknowledgment.
    pub fn payload_type(&self) -> Option<&str> {
        self.payload.as_ref()?.get("type")?.as_str()
    }
}

/// Tool execution request from the gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolRequest {
    pub id: String,
    pub tool: String,
    pub arguments: Value,
}

/// Decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Event { event: String, payload: Value },
    Response(Response),
    ToolRequest(ToolRequest),
    /// Well-formed frame of a type this client does not handle.
    Unknown(String),
    /// Could not be decoded; carries the reason.
    Malformed(String),
}

impl InboundFrame {
    /// Decode a text frame. Never fails: undecodable input becomes [`InboundFrame::Malformed`].
    pub fn decode(text: &str) -> Self {
        parse(text).unwrap_or_else(|e| Self::Malformed(e.to_string()))
    }
}

/// Strict decoder behind [`InboundFrame::decode`].
pub fn parse(text: &str) -> Result<InboundFrame, GatewayError> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| GatewayError::MalformedFrame(format!("invalid JSON: {e}")))?;
    let Some(obj) = value.as_object() else {
        return Err(GatewayError::MalformedFrame("frame is not a JSON object".into()));
    };
    let kind = obj
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| GatewayError::MalformedFrame("missing frame type".into()))?;

    let reply_id = || {
        obj.get("reply_to")
            .and_then(Value::as_str)
            .or_else(|| obj.get("id").and_then(Value::as_str))
            .map(str::to_string)
            .ok_or_else(|| GatewayError::MalformedFrame(format!("'{kind}' frame without id")))
    };

    let frame = match kind {
        "event" => {
            let event = obj
                .get("event")
                .and_then(Value::as_str)
                .ok_or_else(|| GatewayError::MalformedFrame("event frame without name".into()))?;
            InboundFrame::Event {
                event: event.to_string(),
                payload: obj.get("payload").cloned().unwrap_or_else(|| json!({})),
            }
        }
        "res" => {
            let ok = obj.get("ok").and_then(Value::as_bool).unwrap_or(false);
            let payload = obj.get("payload").filter(|p| !p.is_null()).cloned();
            let done = payload
                .as_ref()
                .and_then(|p| p.get("done"))
                .and_then(Value::as_bool)
                .unwrap_or(false);
            let end = obj.get("end").and_then(Value::as_bool).unwrap_or(false) || done;
            let error = if ok {
                None
            } else {
                Some(
                    obj.get("error")
                        .map(error_message)
                        .unwrap_or_else(|| "request failed".to_string()),
                )
            };
            InboundFrame::Response(Response {
                id: reply_id()?,
                ok,
                payload,
                error,
                end,
            })
        }
        "tool.request" => {
            let id = obj
                .get("id")
                .and_then(Value::as_str)
                .ok_or_else(|| GatewayError::MalformedFrame("tool request without id".into()))?;
            let tool = obj
                .get("tool")
                .and_then(Value::as_str)
                .ok_or_else(|| GatewayError::MalformedFrame("tool request without tool".into()))?;
            InboundFrame::ToolRequest(ToolRequest {
                id: id.to_string(),
                tool: tool.to_string(),
                arguments: obj.get("arguments").cloned().unwrap_or_else(|| json!({})),
            })
        }
        "message.response" => InboundFrame::Response(Response {
            id: reply_id()?,
            ok: true,
            payload: Some(json!({ "content": legacy_content(obj) })),
            error: None,
            end: true,
        }),
        "message.chunk" => InboundFrame::Response(Response {
            id: reply_id()?,
            ok: true,
            payload: Some(json!({ "content": legacy_content(obj) })),
            error: None,
            end: false,
        }),
        "message.end" => InboundFrame::Response(Response {
            id: reply_id()?,
            ok: true,
            payload: None,
            error: None,
            end: true,
        }),
        "error" => {
            let message = obj
                .get("message")
                .map(error_message)
                .unwrap_or_else(|| "Gateway error".to_string());
            match reply_id() {
                Ok(id) => InboundFrame::Response(Response {
                    id,
                    ok: false,
                    payload: None,
                    error: Some(message),
                    end: true,
                }),
                // Uncorrelated error: nothing to resolve, surface it as an event.
                Err(_) => InboundFrame::Event {
                    event: "error".into(),
                    payload: json!({ "message": message }),
                },
            }
        }
        other => InboundFrame::Unknown(other.to_string()),
    };
    Ok(frame)
}

fn legacy_content(obj: &serde_json::Map<String, Value>) -> Value {
    obj.get("content").cloned().unwrap_or_else(|| json!(""))
}

// ── Payload helpers ────────────────────────────────────────────────

/// Reply text from a payload: the first of [`TEXT_FIELDS`] present, else the
/// JSON rendering of the whole payload.
pub fn extract_text(payload: &Value) -> String {
    for field in TEXT_FIELDS {
        match payload.get(field) {
            Some(Value::String(s)) => return s.clone(),
            Some(Value::Null) | None => {}
            Some(other) => return other.to_string(),
        }
    }
    match payload {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Text of a stream chunk, or `None` when the payload is a bare `{done: true}` marker.
pub fn chunk_text(payload: &Value) -> Option<String> {
    let has_text = TEXT_FIELDS.iter().any(|f| payload.get(*f).is_some());
    if !has_text && payload.get("done").is_some() {
        return None;
    }
    Some(extract_text(payload))
}

/// Human-readable error: a plain string, or `{code, message}`.
pub fn error_message(error: &Value) -> String {
    match error {
        Value::String(s) => s.clone(),
        Value::Object(obj) => {
            let message = obj.get("message").and_then(Value::as_str);
            let code = obj.get("code").and_then(Value::as_str);
            match (code, message) {
                (Some(code), Some(message)) => format!("{code}: {message}"),
                (None, Some(message)) => message.to_string(),
                _ => error.to_string(),
            }
        }
        other => other.to_string(),
    }
}
