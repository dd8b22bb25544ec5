//! Inbound event router.
//!
//! The listener hands every decoded frame to [`dispatch`] and awaits it
//! before reading the next one, so frames are handled strictly in order.

use serde_json::{json, Value};

use super::protocol::{
    error_message, ConnectParams, InboundFrame, RequestFrame, Response, ToolRequest,
    ToolResponseFrame, EVENT_ACCEPTED, EVENT_CHALLENGE, EVENT_REJECTED, HELLO_OK,
};
use super::{GatewayError, Shared};

pub(crate) async fn dispatch(shared: &Shared, frame: InboundFrame) {
    match frame {
        InboundFrame::Event { event, payload } => handle_event(shared, &event, &payload).await,
        InboundFrame::Response(response) => handle_response(shared, &response),
        InboundFrame::ToolRequest(request) => handle_tool_request(shared, request).await,
        InboundFrame::Unknown(kind) => {
            tracing::debug!(
                session_id = %shared.session_id,
                frame_type = %kind,
                "Ignoring unhandled gateway frame"
            );
        }
        InboundFrame::Malformed(reason) => {
            tracing::warn!(
                session_id = %shared.session_id,
                reason = %reason,
                "Discarding malformed gateway frame"
            );
        }
    }
}

// ── Events ─────────────────────────────────────────────────────────

async fn handle_event(shared: &Shared, event: &str, payload: &Value) {
    tracing::debug!(session_id = %shared.session_id, event = event, "Gateway event");

    match event {
        EVENT_CHALLENGE => answer_challenge(shared, payload).await,
        EVENT_ACCEPTED => {
            tracing::info!(session_id = %shared.session_id, "Connection accepted by gateway");
            shared.session.accepted();
        }
        EVENT_REJECTED => {
            let reason = ["reason", "message", "error"]
                .iter()
                .find_map(|key| payload.get(*key))
                .map(error_message)
                .unwrap_or_else(|| "connection rejected".to_string());
            tracing::error!(session_id = %shared.session_id, reason = %reason, "Connection rejected by gateway");
            shared.session.rejected(reason);
        }
        "error" => {
            tracing::warn!(
                session_id = %shared.session_id,
                message = %payload.get("message").map(error_message).unwrap_or_default(),
                "Gateway error"
            );
        }
        other => {
            tracing::debug!(session_id = %shared.session_id, event = other, "Unhandled gateway event");
        }
    }
}

/// Answer a `connect.challenge` with exactly one `connect` request.
async fn answer_challenge(shared: &Shared, payload: &Value) {
    let nonce = payload.get("nonce").and_then(Value::as_str).unwrap_or_default();
    tracing::debug!(session_id = %shared.session_id, nonce = nonce, "Handling connect challenge");

    let token = shared.token.as_deref().filter(|t| !t.is_empty());
    if token.is_none() {
        tracing::warn!(
            "No gateway token configured - connection may be rejected. \
             Set --gateway-token or OPENCLAW_TOKEN."
        );
    }

    let id = uuid::Uuid::new_v4().to_string();
    let frame = serde_json::to_value(ConnectParams::new(token))
        .map_err(GatewayError::from)
        .and_then(|params| RequestFrame::new(&id, "connect", &params).to_text());
    let frame = match frame {
        Ok(frame) => frame,
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode connect request");
            return;
        }
    };

    // Remember the id first so a fast reply is recognised.
    shared.session.challenged(id.clone());
    match shared.send_text(frame).await {
        Ok(()) => tracing::debug!(session_id = %shared.session_id, request_id = %id, "Sent connect request"),
        Err(e) => tracing::error!(session_id = %shared.session_id, error = %e, "Failed to send connect request"),
    }
}

// ── Responses ──────────────────────────────────────────────────────

fn handle_response(shared: &Shared, response: &Response) {
    if response.ok && response.payload_type() == Some(HELLO_OK) {
        tracing::info!(session_id = %shared.session_id, "Gateway handshake successful");
        shared.session.accepted();
        return;
    }

    if shared.session.is_connect_request(&response.id) {
        if response.ok {
            tracing::info!(session_id = %shared.session_id, "Gateway handshake successful");
            shared.session.accepted();
        } else {
            let reason = response
                .error
                .clone()
                .unwrap_or_else(|| "connect request failed".to_string());
            tracing::error!(session_id = %shared.session_id, reason = %reason, "Connection rejected by gateway");
            shared.session.rejected(reason);
        }
        return;
    }

    if !response.ok {
        tracing::warn!(
            request_id = %response.id,
            error = response.error.as_deref().unwrap_or_default(),
            "Gateway request failed"
        );
    }

    if !shared.pending.resolve(response) {
        tracing::debug!(request_id = %response.id, "Discarding response for unknown request");
    }
}

// ── Tool requests ──────────────────────────────────────────────────

/// Run the installed tool handler and always answer with one `tool.response`.
async fn handle_tool_request(shared: &Shared, request: ToolRequest) {
    tracing::info!(
        session_id = %shared.session_id,
        request_id = %request.id,
        tool = %request.tool,
        arguments = %request.arguments,
        "Gateway tool request"
    );

    let handler = shared.tool_handler.read().clone();
    let result = match handler {
        Some(handler) => match handler.handle(&request.tool, request.arguments).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(tool = %request.tool, error = %e, "Tool execution failed");
                json!({ "status": "error", "message": e.to_string() })
            }
        },
        None => json!({
            "status": "error",
            "message": GatewayError::ToolHandlerMissing.to_string(),
        }),
    };

    let frame = match ToolResponseFrame::new(&request.id, &result).to_text() {
        Ok(frame) => frame,
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode tool response");
            return;
        }
    };
    if let Err(e) = shared.send_text(frame).await {
        tracing::warn!(request_id = %request.id, error = %e, "Failed to send tool response");
    }
}
