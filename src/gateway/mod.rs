//! OpenClaw gateway session.
//!
//! [`GatewayClient`] owns one logical session with the gateway:
//!
//! 1. **Connect**: open the transport (WebSocket, bearer token header) and
//!    start the listener task
//! 2. **Handshake**: answer `connect.challenge` with a `connect` request, then
//!    wait for `connect.accepted` / `hello-ok`. Both waits are bounded; a
//!    gateway that never challenges is treated as not requiring auth, and one
//!    that never acknowledges leaves the session usable but degraded
//! 3. **Requests**: `req` frames correlated with `res` replies by id, either
//!    single-shot or streamed chunk by chunk
//! 4. **Tools**: `tool.request` frames are run through the installed
//!    [`ToolHandler`] and always answered with one `tool.response`

pub mod error;
mod pending;
pub mod protocol;
mod router;
mod session;
pub mod transport;

pub use error::GatewayError;
pub use pending::{ResponseStream, StreamItem};
pub use session::{AuthStatus, ConnectionStatus, SessionStatus};
pub use transport::{Connector, FrameSink, FrameSource, WebSocketConnector};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::{ChatMethod, GatewayConfig};
use pending::PendingTable;
use protocol::{InboundFrame, RequestFrame};
use session::{SessionCell, SessionState};

/// Session key used with `agent.run`.
pub const AGENT_SESSION_KEY: &str = "agent:main:reachy-mini";

/// Prefix of the per-client `chat.send` session key.
pub const CHAT_SESSION_PREFIX: &str = "reachy-mini";

// ── Tool bridge ────────────────────────────────────────────────────

/// Executes robot actions requested by the gateway.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Run `tool` with `arguments` and return its JSON result.
    async fn handle(&self, tool: &str, arguments: Value) -> anyhow::Result<Value>;
}

// ── Options ────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct GatewayOptions {
    /// `ws://host:port`
    pub url: String,
    pub token: Option<String>,
    /// Bound on opening the transport and on each handshake wait.
    pub handshake_timeout: Duration,
    /// Bound on each reply (or each stream chunk).
    pub request_timeout: Duration,
    pub chat_method: ChatMethod,
}

impl GatewayOptions {
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            url: config.url(),
            token: config.token.clone().filter(|t| !t.is_empty()),
            handshake_timeout: Duration::from_secs(config.handshake_timeout_secs),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            chat_method: config.chat_method,
        }
    }
}

/// A chat turn sent with [`GatewayClient::send_chat`] or [`GatewayClient::stream_chat`].
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub text: String,
    pub image_path: Option<PathBuf>,
    /// Extra params; keys set here are never overwritten by the defaults.
    pub extra: Map<String, Value>,
}

impl ChatRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn with_image(mut self, path: impl Into<PathBuf>) -> Self {
        self.image_path = Some(path.into());
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Params for `method`, with caller-supplied keys taking precedence.
    pub fn to_params(
        &self,
        method: ChatMethod,
        session_id: &str,
        request_id: &str,
        stream: bool,
    ) -> Value {
        let mut defaults = match method {
            ChatMethod::ChatSend => json!({
                "message": self.text,
                "sessionKey": format!("{CHAT_SESSION_PREFIX}:{session_id}"),
                "idempotencyKey": request_id,
            }),
            ChatMethod::AgentRun => json!({
                "prompt": self.text,
                "session": AGENT_SESSION_KEY,
                "stream": stream,
            }),
        };
        if stream && method == ChatMethod::ChatSend {
            defaults["stream"] = json!(true);
        }
        if let Some(path) = &self.image_path {
            defaults["attachments"] = json!([{ "type": "image", "path": path.display().to_string() }]);
        }

        let mut params = self.extra.clone();
        if let Value::Object(defaults) = defaults {
            for (key, value) in defaults {
                params.entry(key).or_insert(value);
            }
        }
        Value::Object(params)
    }
}

// ── Shared state ───────────────────────────────────────────────────

/// State shared between the client handle and its listener task.
pub(crate) struct Shared {
    session_id: String,
    token: Option<String>,
    session: SessionCell,
    pending: Arc<PendingTable>,
    sink: tokio::sync::Mutex<Option<Box<dyn FrameSink>>>,
    tool_handler: RwLock<Option<Arc<dyn ToolHandler>>>,
}

impl Shared {
    async fn send_text(&self, text: String) -> Result<(), GatewayError> {
        let mut sink = self.sink.lock().await;
        let sink = sink.as_mut().ok_or(GatewayError::NotConnected)?;
        sink.send_text(text).await
    }
}

/// Read frames until the transport closes, dispatching each in order.
async fn listen(shared: Arc<Shared>, mut source: Box<dyn FrameSource>) {
    while let Some(next) = source.next_text().await {
        match next {
            Ok(text) => router::dispatch(&shared, InboundFrame::decode(&text)).await,
            Err(e) => {
                tracing::error!(session_id = %shared.session_id, error = %e, "Gateway listener error");
                break;
            }
        }
    }
    tracing::info!(session_id = %shared.session_id, "Gateway connection closed");
    shared.session.closed();
}

/// Wait until `pred` holds, for at most `limit`.
async fn wait_until(
    rx: &mut watch::Receiver<SessionState>,
    limit: Duration,
    pred: impl FnMut(&SessionState) -> bool,
) -> bool {
    tokio::time::timeout(limit, rx.wait_for(pred))
        .await
        .map(|waited| waited.is_ok())
        .unwrap_or(false)
}

// ── Client ─────────────────────────────────────────────────────────

/// Client for one OpenClaw gateway session.
pub struct GatewayClient {
    options: GatewayOptions,
    connector: Arc<dyn Connector>,
    shared: Arc<Shared>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl GatewayClient {
    /// Client that connects over WebSocket.
    pub fn new(options: GatewayOptions) -> Self {
        Self::with_connector(options, Arc::new(WebSocketConnector))
    }

    pub fn with_connector(options: GatewayOptions, connector: Arc<dyn Connector>) -> Self {
        let shared = Arc::new(Shared {
            session_id: uuid::Uuid::new_v4().to_string(),
            token: options.token.clone(),
            session: SessionCell::new(),
            pending: PendingTable::new(),
            sink: tokio::sync::Mutex::new(None),
            tool_handler: RwLock::new(None),
        });
        Self {
            options,
            connector,
            shared,
            listener: Mutex::new(None),
        }
    }

    /// Locally generated session id, stable for the lifetime of the client.
    pub fn session_id(&self) -> &str {
        &self.shared.session_id
    }

    pub fn status(&self) -> SessionStatus {
        self.shared.session.status()
    }

    pub fn is_connected(&self) -> bool {
        self.status().connection == ConnectionStatus::Ready
    }

    pub fn options(&self) -> &GatewayOptions {
        &self.options
    }

    /// Install the handler that serves `tool.request` frames.
    pub fn set_tool_handler(&self, handler: Arc<dyn ToolHandler>) {
        *self.shared.tool_handler.write() = Some(handler);
    }

    /// Open the session and run the handshake. No-op when already connected.
    pub async fn connect(&self) -> Result<(), GatewayError> {
        if self.is_connected() {
            return Ok(());
        }
        if !self.shared.session.begin_attempt() {
            return Err(GatewayError::Transport(
                "a connection attempt is already in progress".into(),
            ));
        }
        // Leftovers of a session that closed underneath us.
        self.teardown().await;

        let opts = &self.options;
        tracing::info!(
            session_id = %self.shared.session_id,
            url = %opts.url,
            "Connecting to OpenClaw gateway"
        );

        let opened = tokio::time::timeout(
            opts.handshake_timeout,
            self.connector.connect(&opts.url, opts.token.as_deref()),
        )
        .await;
        let (sink, source) = match opened {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => {
                tracing::error!(url = %opts.url, error = %e, "Failed to connect to gateway");
                self.shared.session.closed();
                return Err(e);
            }
            Err(_) => {
                tracing::error!(url = %opts.url, "Timed out connecting to gateway");
                self.shared.session.closed();
                return Err(GatewayError::Transport(format!(
                    "timed out connecting to {} after {:?}",
                    opts.url, opts.handshake_timeout
                )));
            }
        };

        *self.shared.sink.lock().await = Some(sink);
        let handle = tokio::spawn(listen(Arc::clone(&self.shared), source));
        *self.listener.lock() = Some(handle);

        let mut rx = self.shared.session.subscribe();

        // Authentication: a challenge is answered by the router.
        let challenged = wait_until(&mut rx, opts.handshake_timeout, |s| {
            s.auth_released || s.connection.is_idle()
        })
        .await;
        self.check_handshake(false).await?;
        if !challenged {
            tracing::debug!(
                session_id = %self.shared.session_id,
                "No authentication challenge received, proceeding"
            );
            self.shared.session.update(|s| {
                if s.auth == AuthStatus::Unauthenticated {
                    s.auth = AuthStatus::Authenticated;
                }
            });
        }

        // Acknowledgment of the session.
        let acknowledged = wait_until(&mut rx, opts.handshake_timeout, |s| {
            s.ack_released || s.connection.is_idle()
        })
        .await;
        self.check_handshake(false).await?;
        if !acknowledged {
            tracing::warn!(
                session_id = %self.shared.session_id,
                error = %GatewayError::HandshakeTimeout(opts.handshake_timeout),
                "No connect response received, connection may fail"
            );
            self.shared.session.update(|s| {
                if !s.ack_released && s.transition(ConnectionStatus::Ready) {
                    s.degraded = true;
                }
            });
        }
        self.check_handshake(true).await?;

        tracing::info!(
            session_id = %self.shared.session_id,
            url = %opts.url,
            degraded = !acknowledged,
            "Connected to OpenClaw gateway"
        );
        Ok(())
    }

    /// Fail `connect()` if the session was rejected, dropped or disconnected,
    /// or, with `finished`, did not end up ready.
    async fn check_handshake(&self, finished: bool) -> Result<(), GatewayError> {
        let state = self.shared.session.get();
        if state.auth == AuthStatus::Rejected {
            self.teardown().await;
            self.shared.session.closed();
            return Err(GatewayError::AuthenticationRejected(
                state.rejection.unwrap_or_else(|| "connection rejected".into()),
            ));
        }
        let failed = match state.connection {
            ConnectionStatus::Closed | ConnectionStatus::Disconnected => true,
            ConnectionStatus::Ready => false,
            ConnectionStatus::Connecting | ConnectionStatus::Authenticating => finished,
        };
        if failed {
            self.teardown().await;
            // An explicit disconnect() already reset the session.
            if state.connection != ConnectionStatus::Disconnected {
                self.shared.session.closed();
            }
            return Err(GatewayError::ConnectionClosed);
        }
        Ok(())
    }

    /// Close the session. Idempotent.
    pub async fn disconnect(&self) {
        let had_session = self.teardown().await;
        self.shared.session.reset();
        if had_session {
            tracing::info!(session_id = %self.shared.session_id, "Disconnected from OpenClaw gateway");
        }
    }

    /// Stop the listener and close the transport. Returns whether anything was open.
    async fn teardown(&self) -> bool {
        let listener = self.listener.lock().take();
        let had_listener = listener.is_some();
        if let Some(handle) = listener {
            handle.abort();
            let _ = handle.await;
        }

        let sink = self.shared.sink.lock().await.take();
        let had_sink = sink.is_some();
        if let Some(mut sink) = sink {
            if let Err(e) = sink.close().await {
                tracing::debug!(error = %e, "Error closing gateway transport");
            }
        }
        had_listener || had_sink
    }

    fn ensure_connected(&self) -> Result<(), GatewayError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(GatewayError::NotConnected)
        }
    }

    // ── Requests ──────────────────────────────────────────────────

    /// Send `method` with `params` and wait for the reply text.
    pub async fn send_and_await(&self, method: &str, params: Value) -> Result<String, GatewayError> {
        self.request(method, |_| params).await
    }

    /// Send `method` with `params` and stream the reply.
    pub async fn send_and_stream(
        &self,
        method: &str,
        params: Value,
    ) -> Result<ResponseStream, GatewayError> {
        self.open_stream(method, |_| params).await
    }

    /// Send a user message with the configured chat method and wait for the reply.
    pub async fn send_message(
        &self,
        text: &str,
        image_path: Option<&Path>,
    ) -> Result<String, GatewayError> {
        let mut chat = ChatRequest::new(text);
        chat.image_path = image_path.map(Path::to_path_buf);
        self.send_chat(&chat).await
    }

    /// Send a user message and stream the reply.
    pub async fn stream_message(&self, text: &str) -> Result<ResponseStream, GatewayError> {
        self.stream_chat(&ChatRequest::new(text)).await
    }

    pub async fn send_chat(&self, chat: &ChatRequest) -> Result<String, GatewayError> {
        let method = self.options.chat_method;
        self.request(method.as_str(), |id| {
            chat.to_params(method, &self.shared.session_id, id, false)
        })
        .await
    }

    pub async fn stream_chat(&self, chat: &ChatRequest) -> Result<ResponseStream, GatewayError> {
        let method = self.options.chat_method;
        self.open_stream(method.as_str(), |id| {
            chat.to_params(method, &self.shared.session_id, id, true)
        })
        .await
    }

    async fn request(
        &self,
        method: &str,
        build: impl FnOnce(&str) -> Value,
    ) -> Result<String, GatewayError> {
        self.ensure_connected()?;
        let (guard, rx) = self.shared.pending.register_single();
        let params = build(guard.id());
        let frame = RequestFrame::new(guard.id(), method, &params).to_text()?;

        tracing::debug!(
            session_id = %self.shared.session_id,
            request_id = %guard.id(),
            method = method,
            "Sending gateway request"
        );
        self.shared.send_text(frame).await?;

        let limit = self.options.request_timeout;
        match tokio::time::timeout(limit, rx).await {
            Ok(Ok(result)) => result.map(|payload| protocol::extract_text(&payload)),
            Ok(Err(_)) => Err(GatewayError::ConnectionClosed),
            Err(_) => {
                tracing::warn!(
                    request_id = %guard.id(),
                    method = method,
                    "Timed out waiting for gateway response"
                );
                Err(GatewayError::RequestTimeout(limit))
            }
        }
    }

    async fn open_stream(
        &self,
        method: &str,
        build: impl FnOnce(&str) -> Value,
    ) -> Result<ResponseStream, GatewayError> {
        self.ensure_connected()?;
        let (guard, rx) = self.shared.pending.register_streamed();
        let params = build(guard.id());
        let frame = RequestFrame::new(guard.id(), method, &params).to_text()?;

        tracing::debug!(
            session_id = %self.shared.session_id,
            request_id = %guard.id(),
            method = method,
            "Opening gateway stream"
        );
        self.shared.send_text(frame).await?;
        Ok(ResponseStream::new(guard, rx, self.options.request_timeout))
    }
}

impl Drop for GatewayClient {
    fn drop(&mut self) {
        if let Some(handle) = self.listener.get_mut().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::transport::memory::{MemoryConnector, MemoryServer};
    use super::*;
    use std::time::Instant;
    use tokio::sync::mpsc;

    fn options() -> GatewayOptions {
        GatewayOptions {
            url: "ws://gateway.test:18789".into(),
            token: Some("secret-token".into()),
            handshake_timeout: Duration::from_millis(300),
            request_timeout: Duration::from_millis(500),
            chat_method: ChatMethod::ChatSend,
        }
    }

    fn client_with(options: GatewayOptions) -> (Arc<GatewayClient>, mpsc::UnboundedReceiver<MemoryServer>) {
        let (connector, servers) = MemoryConnector::new();
        (
            Arc::new(GatewayClient::with_connector(options, Arc::new(connector))),
            servers,
        )
    }

    fn spawn_connect(client: &Arc<GatewayClient>) -> JoinHandle<Result<(), GatewayError>> {
        let client = Arc::clone(client);
        tokio::spawn(async move { client.connect().await })
    }

    fn challenge() -> Value {
        json!({"type": "event", "event": "connect.challenge", "payload": {"nonce": "n", "ts": 1}})
    }

    /// Connect through a full challenge + hello-ok handshake.
    async fn connected(options: GatewayOptions) -> (Arc<GatewayClient>, MemoryServer) {
        let (client, mut servers) = client_with(options);
        let connecting = spawn_connect(&client);
        let mut server = servers.recv().await.unwrap();

        server.send_json(challenge());
        let connect = server.recv_json().await;
        server.send_json(json!({
            "type": "res", "id": connect["id"], "ok": true, "payload": {"type": "hello-ok"}
        }));
        connecting.await.unwrap().unwrap();
        (client, server)
    }

    struct EchoTools;

    #[async_trait]
    impl ToolHandler for EchoTools {
        async fn handle(&self, tool: &str, arguments: Value) -> anyhow::Result<Value> {
            if tool == "explode" {
                anyhow::bail!("boom");
            }
            Ok(json!({"status": "success", "tool": tool, "echo": arguments}))
        }
    }

    // ── Handshake ─────────────────────────────────────────────────

    #[tokio::test]
    async fn challenge_produces_connect_request_with_token() {
        let (client, mut servers) = client_with(options());
        let connecting = spawn_connect(&client);
        let mut server = servers.recv().await.unwrap();
        assert_eq!(server.token.as_deref(), Some("secret-token"));

        server.send_json(challenge());
        let connect = server.recv_json().await;
        assert_eq!(connect["type"], "req");
        assert_eq!(connect["method"], "connect");
        assert_eq!(connect["params"]["auth"]["token"], "secret-token");
        assert_eq!(connect["params"]["minProtocol"], 3);
        assert_eq!(connect["params"]["client"]["id"], "gateway-client");
        assert_eq!(connect["params"]["role"], "operator");

        server.send_json(json!({"type": "res", "id": connect["id"], "ok": true, "payload": {"type": "hello-ok"}}));
        connecting.await.unwrap().unwrap();

        // Exactly one connect frame per challenge.
        server.expect_silence(Duration::from_millis(50)).await;
        let status = client.status();
        assert_eq!(status.connection, ConnectionStatus::Ready);
        assert_eq!(status.auth, AuthStatus::Authenticated);
        assert!(!status.degraded);
        assert!(client.is_connected());
    }

    #[tokio::test]
    async fn challenge_without_token_sends_empty_token() {
        let mut opts = options();
        opts.token = None;
        let (client, mut servers) = client_with(opts);
        let connecting = spawn_connect(&client);
        let mut server = servers.recv().await.unwrap();
        assert_eq!(server.token, None);

        server.send_json(challenge());
        let connect = server.recv_json().await;
        assert_eq!(connect["params"]["auth"]["token"], "");
        server.send_json(json!({"type": "event", "event": "connect.accepted", "payload": {}}));
        connecting.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn success_reply_to_connect_request_acknowledges() {
        let (client, mut servers) = client_with(options());
        let connecting = spawn_connect(&client);
        let mut server = servers.recv().await.unwrap();

        server.send_json(challenge());
        let connect = server.recv_json().await;
        server.send_json(json!({"type": "res", "id": connect["id"], "ok": true, "payload": {}}));
        connecting.await.unwrap().unwrap();
        assert!(!client.status().degraded);
    }

    #[tokio::test]
    async fn acceptance_without_challenge_releases_both_waits() {
        let (client, mut servers) = client_with(options());
        let started = Instant::now();
        let connecting = spawn_connect(&client);
        let server = servers.recv().await.unwrap();

        server.send_json(json!({"type": "event", "event": "connect.accepted", "payload": {}}));
        connecting.await.unwrap().unwrap();
        assert!(started.elapsed() < Duration::from_millis(250));
        assert_eq!(client.status().connection, ConnectionStatus::Ready);
        assert_eq!(client.status().auth, AuthStatus::Authenticated);
    }

    #[tokio::test]
    async fn silent_gateway_is_permissive_but_degraded() {
        let (client, mut servers) = client_with(options());
        let connecting = spawn_connect(&client);
        let _server = servers.recv().await.unwrap();

        connecting.await.unwrap().unwrap();
        let status = client.status();
        assert_eq!(status.auth, AuthStatus::Authenticated);
        assert_eq!(status.connection, ConnectionStatus::Ready);
        assert!(status.degraded);
    }

    #[tokio::test]
    async fn rejection_event_fails_connect() {
        let (client, mut servers) = client_with(options());
        let connecting = spawn_connect(&client);
        let mut server = servers.recv().await.unwrap();

        server.send_json(challenge());
        let _connect = server.recv_json().await;
        server.send_json(json!({"type": "event", "event": "connect.rejected", "payload": {"reason": "bad token"}}));

        let err = connecting.await.unwrap().unwrap_err();
        assert!(matches!(err, GatewayError::AuthenticationRejected(ref r) if r == "bad token"));
        assert_eq!(client.status().auth, AuthStatus::Rejected);
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn failed_reply_to_connect_request_is_rejection() {
        let (client, mut servers) = client_with(options());
        let connecting = spawn_connect(&client);
        let mut server = servers.recv().await.unwrap();

        server.send_json(challenge());
        let connect = server.recv_json().await;
        server.send_json(json!({
            "type": "res", "id": connect["id"], "ok": false,
            "error": {"code": "UNAUTHORIZED", "message": "invalid token"}
        }));

        let err = connecting.await.unwrap().unwrap_err();
        assert!(matches!(err, GatewayError::AuthenticationRejected(ref r) if r.contains("invalid token")));
    }

    #[tokio::test]
    async fn refused_transport_is_transport_error() {
        let client = GatewayClient::with_connector(options(), Arc::new(MemoryConnector::refusing()));
        let err = client.connect().await.unwrap_err();
        assert!(matches!(err, GatewayError::Transport(_)));
        assert_eq!(client.status().connection, ConnectionStatus::Closed);
    }

    #[tokio::test]
    async fn close_during_handshake_is_connection_closed() {
        let (client, mut servers) = client_with(options());
        let connecting = spawn_connect(&client);
        let mut server = servers.recv().await.unwrap();
        server.close();

        let err = connecting.await.unwrap().unwrap_err();
        assert!(matches!(err, GatewayError::ConnectionClosed));
        assert_eq!(client.status().connection, ConnectionStatus::Closed);
    }

    #[tokio::test]
    async fn second_connect_during_handshake_is_refused() {
        let (client, mut servers) = client_with(options());
        let connecting = spawn_connect(&client);
        let mut server = servers.recv().await.unwrap();

        let err = client.connect().await.unwrap_err();
        assert!(matches!(err, GatewayError::Transport(ref m) if m.contains("already in progress")));
        assert!(servers.try_recv().is_err(), "no second transport opened");

        // The first attempt is untouched and completes normally.
        server.send_json(challenge());
        let connect = server.recv_json().await;
        server.send_json(json!({"type": "res", "id": connect["id"], "ok": true, "payload": {"type": "hello-ok"}}));
        connecting.await.unwrap().unwrap();
        assert!(!client.status().degraded);

        let asking = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.send_and_await("chat.send", json!({"message": "ping"})).await })
        };
        let request = server.recv_json().await;
        server.send_json(json!({"type": "res", "id": request["id"], "ok": true, "payload": {"text": "pong"}}));
        assert_eq!(asking.await.unwrap().unwrap(), "pong");
    }

    #[tokio::test]
    async fn disconnect_during_handshake_fails_connect() {
        let (client, mut servers) = client_with(options());
        let started = Instant::now();
        let connecting = spawn_connect(&client);
        let _server = servers.recv().await.unwrap();

        client.disconnect().await;
        let err = connecting.await.unwrap().unwrap_err();
        assert!(matches!(err, GatewayError::ConnectionClosed));
        assert!(started.elapsed() < Duration::from_millis(250));
        assert_eq!(client.status().connection, ConnectionStatus::Disconnected);
        assert!(!client.is_connected());
    }

    struct StallingConnector;

    #[async_trait]
    impl Connector for StallingConnector {
        async fn connect(
            &self,
            _url: &str,
            _token: Option<&str>,
        ) -> Result<transport::FramePair, GatewayError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn stalled_transport_open_is_transport_error() {
        let client = GatewayClient::with_connector(options(), Arc::new(StallingConnector));
        let err = client.connect().await.unwrap_err();
        assert!(matches!(err, GatewayError::Transport(ref m) if m.contains("timed out connecting")));
        assert_eq!(client.status().connection, ConnectionStatus::Closed);
    }

    #[tokio::test]
    async fn connect_is_noop_when_connected_and_disconnect_is_idempotent() {
        let (client, _server) = connected(options()).await;
        client.connect().await.unwrap();

        client.disconnect().await;
        client.disconnect().await;
        assert_eq!(client.status().connection, ConnectionStatus::Disconnected);
        assert_eq!(client.status().auth, AuthStatus::Unauthenticated);
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn reconnects_after_server_close() {
        let (client, mut servers) = client_with(options());
        let connecting = spawn_connect(&client);
        let mut first = servers.recv().await.unwrap();
        first.send_json(json!({"type": "event", "event": "connect.accepted"}));
        connecting.await.unwrap().unwrap();

        first.close();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(client.status().connection, ConnectionStatus::Closed);

        let connecting = spawn_connect(&client);
        let second = servers.recv().await.unwrap();
        second.send_json(json!({"type": "event", "event": "connect.accepted"}));
        connecting.await.unwrap().unwrap();
        assert!(client.is_connected());
    }

    // ── Requests ──────────────────────────────────────────────────

    #[tokio::test]
    async fn send_and_await_returns_reply_text() {
        let (client, mut server) = connected(options()).await;
        let call = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.send_and_await("chat.send", json!({"message": "ping"})).await })
        };

        let req = server.recv_json().await;
        assert_eq!(req["type"], "req");
        assert_eq!(req["method"], "chat.send");
        assert_eq!(req["params"], json!({"message": "ping"}));
        server.send_json(json!({"type": "res", "id": req["id"], "ok": true, "payload": {"text": "pong"}}));

        assert_eq!(call.await.unwrap().unwrap(), "pong");
        assert!(client.shared.pending.is_empty());
    }

    #[tokio::test]
    async fn remote_error_is_scoped_to_caller() {
        let (client, mut server) = connected(options()).await;
        let call = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.send_and_await("chat.send", json!({})).await })
        };
        let req = server.recv_json().await;
        server.send_json(json!({"type": "res", "reply_to": req["id"], "ok": false, "error": "quota exceeded"}));

        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, GatewayError::Remote(ref m) if m == "quota exceeded"));
        assert!(client.is_connected());
    }

    #[tokio::test]
    async fn requests_before_connect_fail() {
        let (client, _servers) = client_with(options());
        assert!(matches!(
            client.send_and_await("chat.send", json!({})).await,
            Err(GatewayError::NotConnected)
        ));
        assert!(matches!(
            client.stream_message("hi").await,
            Err(GatewayError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn timeout_removes_entry_and_late_reply_is_dropped() {
        let mut opts = options();
        opts.request_timeout = Duration::from_millis(100);
        let (client, mut server) = connected(opts).await;

        let err = client.send_and_await("chat.send", json!({"message": "slow"})).await.unwrap_err();
        assert!(matches!(err, GatewayError::RequestTimeout(_)));
        assert!(client.shared.pending.is_empty());

        let late = server.recv_json().await;
        server.send_json(json!({"type": "res", "id": late["id"], "ok": true, "payload": {"text": "late"}}));

        // The listener survives and the next request gets its own reply.
        let call = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.send_and_await("chat.send", json!({})).await })
        };
        let req = server.recv_json().await;
        assert_ne!(req["id"], late["id"]);
        server.send_json(json!({"type": "res", "id": req["id"], "ok": true, "payload": {"content": "fresh"}}));
        assert_eq!(call.await.unwrap().unwrap(), "fresh");
    }

    #[tokio::test]
    async fn unknown_reply_and_malformed_frames_are_harmless() {
        let (client, mut server) = connected(options()).await;
        server.send_json(json!({"type": "res", "id": "nobody", "ok": true, "payload": {"text": "?"}}));
        server.send_raw("{not json");
        server.send_json(json!({"type": "presence", "online": true}));

        let call = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.send_and_await("chat.send", json!({})).await })
        };
        let req = server.recv_json().await;
        server.send_json(json!({"type": "res", "id": req["id"], "ok": true, "payload": {"answer": 1}}));
        assert_eq!(call.await.unwrap().unwrap(), r#"{"answer":1}"#);
        assert!(client.is_connected());
    }

    #[tokio::test]
    async fn concurrent_requests_are_correlated_by_id() {
        let (client, mut server) = connected(options()).await;
        let first = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.send_and_await("chat.send", json!({"message": "one"})).await })
        };
        let a = server.recv_json().await;
        let second = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.send_and_await("chat.send", json!({"message": "two"})).await })
        };
        let b = server.recv_json().await;
        assert_ne!(a["id"], b["id"]);

        server.send_json(json!({"type": "res", "id": b["id"], "ok": true, "payload": {"text": "2"}}));
        server.send_json(json!({"type": "res", "id": a["id"], "ok": true, "payload": {"text": "1"}}));
        assert_eq!(first.await.unwrap().unwrap(), "1");
        assert_eq!(second.await.unwrap().unwrap(), "2");
    }

    #[tokio::test]
    async fn stream_yields_chunks_in_order() {
        let (client, mut server) = connected(options()).await;
        let mut stream = client.stream_message("tell me a story").await.unwrap();

        let req = server.recv_json().await;
        assert_eq!(req["params"]["stream"], true);
        let id = req["id"].clone();
        server.send_json(json!({"type": "res", "id": id, "ok": true, "payload": {"text": "Once "}}));
        server.send_json(json!({"type": "message.chunk", "reply_to": id, "content": "upon "}));
        server.send_json(json!({"type": "res", "id": id, "ok": true, "end": true, "payload": {"text": "a time"}}));

        let mut chunks = Vec::new();
        while let Some(chunk) = stream.next_chunk().await {
            chunks.push(chunk.unwrap());
        }
        assert_eq!(chunks, vec!["Once ", "upon ", "a time"]);
        assert!(stream.next_chunk().await.is_none());
        assert!(client.shared.pending.is_empty());
    }

    #[tokio::test]
    async fn legacy_message_response_completes_single_request() {
        let (client, mut server) = connected(options()).await;
        let call = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.send_message("hello", None).await })
        };
        let req = server.recv_json().await;
        server.send_json(json!({"type": "message.response", "reply_to": req["id"], "content": "hi there"}));
        assert_eq!(call.await.unwrap().unwrap(), "hi there");
    }

    #[tokio::test]
    async fn chat_send_params() {
        let (client, mut server) = connected(options()).await;
        let call = {
            let client = Arc::clone(&client);
            tokio::spawn(async move {
                client
                    .send_message("look at this", Some(Path::new("/tmp/frame.jpg")))
                    .await
            })
        };
        let req = server.recv_json().await;
        assert_eq!(req["method"], "chat.send");
        assert_eq!(req["params"]["message"], "look at this");
        assert_eq!(req["params"]["idempotencyKey"], req["id"]);
        assert_eq!(
            req["params"]["sessionKey"],
            format!("reachy-mini:{}", client.session_id())
        );
        assert_eq!(
            req["params"]["attachments"],
            json!([{"type": "image", "path": "/tmp/frame.jpg"}])
        );
        server.send_json(json!({"type": "res", "id": req["id"], "ok": true, "payload": {"text": "nice"}}));
        assert_eq!(call.await.unwrap().unwrap(), "nice");
    }

    #[test]
    fn agent_run_params_keep_caller_keys() {
        let chat = ChatRequest::new("hi")
            .with_param("session", json!("agent:custom"))
            .with_param("thinking", json!("low"));
        let params = chat.to_params(ChatMethod::AgentRun, "sid", "rid", false);
        assert_eq!(params["prompt"], "hi");
        assert_eq!(params["session"], "agent:custom");
        assert_eq!(params["thinking"], "low");
        assert_eq!(params["stream"], false);
        assert!(params.get("idempotencyKey").is_none());
    }

    // ── Tools ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn tool_request_without_handler_gets_error_response() {
        let (_client, mut server) = connected(options()).await;
        server.send_json(json!({"type": "tool.request", "id": "t1", "tool": "reachy_status", "arguments": {}}));

        let reply = server.recv_json().await;
        assert_eq!(
            reply,
            json!({
                "type": "tool.response",
                "id": "t1",
                "result": {"status": "error", "message": "Tool handler not registered"}
            })
        );
        server.expect_silence(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn tool_request_runs_handler() {
        let (client, mut server) = connected(options()).await;
        client.set_tool_handler(Arc::new(EchoTools));

        server.send_json(json!({"type": "tool.request", "id": "t2", "tool": "wave", "arguments": {"times": 2}}));
        let reply = server.recv_json().await;
        assert_eq!(reply["id"], "t2");
        assert_eq!(reply["result"]["status"], "success");
        assert_eq!(reply["result"]["echo"], json!({"times": 2}));

        server.send_json(json!({"type": "tool.request", "id": "t3", "tool": "explode"}));
        let reply = server.recv_json().await;
        assert_eq!(reply["id"], "t3");
        assert_eq!(reply["result"], json!({"status": "error", "message": "boom"}));
    }

    #[tokio::test]
    async fn server_close_marks_session_closed() {
        let (client, mut server) = connected(options()).await;
        server.close();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(client.status().connection, ConnectionStatus::Closed);
        assert!(matches!(
            client.send_and_await("chat.send", json!({})).await,
            Err(GatewayError::NotConnected)
        ));
    }
}
