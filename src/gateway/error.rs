use std::time::Duration;
use thiserror::Error;

/// Errors raised by the gateway session.
///
/// Transport-level failures end the session; request-level failures are
/// scoped to the caller that issued the request.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The transport could not be opened or a write failed.
    #[error("gateway transport error: {0}")]
    Transport(String),

    /// The transport closed while the caller was waiting on it.
    #[error("gateway connection closed")]
    ConnectionClosed,

    /// A request was issued before `connect()` succeeded.
    #[error("not connected to the OpenClaw gateway")]
    NotConnected,

    /// A handshake wait expired. Not fatal: `connect()` logs it and carries
    /// on with a degraded session. A transport that cannot be opened in
    /// time is a `Transport` error instead.
    #[error("gateway handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    /// The gateway refused the session.
    #[error("gateway rejected the connection: {0}")]
    AuthenticationRejected(String),

    /// No reply (or stream chunk) arrived within the request timeout.
    #[error("timed out after {0:?} waiting for gateway response")]
    RequestTimeout(Duration),

    /// The gateway answered with an error.
    #[error("gateway error: {0}")]
    Remote(String),

    /// An inbound frame could not be decoded.
    #[error("malformed gateway frame: {0}")]
    MalformedFrame(String),

    /// A tool request arrived with no handler installed.
    #[error("Tool handler not registered")]
    ToolHandlerMissing,

    #[error("gateway frame serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}
