//! Duplex text-frame transport.
//!
//! The session only needs "send a text frame", "receive the next text frame"
//! and "close". [`WebSocketConnector`] provides them over `tokio-tungstenite`;
//! tests plug in an in-memory pair instead.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::error::GatewayError;

/// Writing half of a transport.
#[async_trait]
pub trait FrameSink: Send {
    async fn send_text(&mut self, text: String) -> Result<(), GatewayError>;

    async fn close(&mut self) -> Result<(), GatewayError>;
}

/// Reading half of a transport. `None` means the peer closed the connection.
#[async_trait]
pub trait FrameSource: Send {
    async fn next_text(&mut self) -> Option<Result<String, GatewayError>>;
}

/// Opened transport halves.
pub type FramePair = (Box<dyn FrameSink>, Box<dyn FrameSource>);

/// Opens transports to the gateway.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a connection to `url`, presenting `token` as a bearer credential when set.
    async fn connect(&self, url: &str, token: Option<&str>) -> Result<FramePair, GatewayError>;
}

// ── WebSocket ──────────────────────────────────────────────────────

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// `tokio-tungstenite` client transport.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &str, token: Option<&str>) -> Result<FramePair, GatewayError> {
        let mut request = url
            .into_client_request()
            .map_err(|e| GatewayError::Transport(format!("Failed to build WebSocket request: {e}")))?;
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            request.headers_mut().insert(
                "Authorization",
                format!("Bearer {token}")
                    .parse()
                    .map_err(|e| GatewayError::Transport(format!("Invalid auth header: {e}")))?,
            );
        }

        let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| GatewayError::Transport(format!("Failed to connect to {url}: {e}")))?;

        let (sender, receiver) = ws_stream.split();
        Ok((
            Box::new(WsSink { sender }),
            Box::new(WsSource { receiver }),
        ))
    }
}

struct WsSink {
    sender: SplitSink<WsStream, WsMessage>,
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send_text(&mut self, text: String) -> Result<(), GatewayError> {
        self.sender
            .send(WsMessage::Text(text.into()))
            .await
            .map_err(|e| GatewayError::Transport(format!("WebSocket send failed: {e}")))
    }

    async fn close(&mut self) -> Result<(), GatewayError> {
        let _ = self.sender.send(WsMessage::Close(None)).await;
        self.sender
            .close()
            .await
            .map_err(|e| GatewayError::Transport(format!("WebSocket close failed: {e}")))
    }
}

struct WsSource {
    receiver: SplitStream<WsStream>,
}

#[async_trait]
impl FrameSource for WsSource {
    async fn next_text(&mut self) -> Option<Result<String, GatewayError>> {
        while let Some(msg) = self.receiver.next().await {
            match msg {
                Ok(WsMessage::Text(text)) => return Some(Ok(text.as_str().to_string())),
                Ok(WsMessage::Close(frame)) => {
                    tracing::debug!(close_frame = ?frame, "Gateway sent close frame");
                    return None;
                }
                Ok(WsMessage::Binary(bytes)) => {
                    // The gateway only speaks text; pass UTF-8 binaries through.
                    match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => return Some(Ok(text)),
                        Err(_) => tracing::debug!("Ignoring non-UTF-8 binary frame"),
                    }
                }
                Ok(WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_)) => {
                    // ping/pong handled by tungstenite
                }
                Err(e) => {
                    return Some(Err(GatewayError::Transport(format!("WebSocket error: {e}"))));
                }
            }
        }
        None
    }
}

// ── In-memory transport (tests) ────────────────────────────────────

#[cfg(test)]
pub(crate) mod memory {
    use super::*;
    use serde_json::Value;
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// Server end of an in-memory connection.
    pub(crate) struct MemoryServer {
        to_client: Option<mpsc::UnboundedSender<Result<String, GatewayError>>>,
        from_client: mpsc::UnboundedReceiver<String>,
        pub token: Option<String>,
    }

    impl MemoryServer {
        pub fn send_json(&self, value: Value) {
            self.send_raw(&value.to_string());
        }

        pub fn send_raw(&self, text: &str) {
            if let Some(tx) = &self.to_client {
                let _ = tx.send(Ok(text.to_string()));
            }
        }

        /// Next frame the client sent, parsed as JSON.
        pub async fn recv_json(&mut self) -> Value {
            let text = tokio::time::timeout(Duration::from_secs(2), self.from_client.recv())
                .await
                .expect("timed out waiting for client frame")
                .expect("client transport dropped");
            serde_json::from_str(&text).expect("client sent invalid JSON")
        }

        /// Next frame, or `None` once the client has gone away.
        pub async fn next_json(&mut self) -> Option<Value> {
            let text = self.from_client.recv().await?;
            serde_json::from_str(&text).ok()
        }

        /// Assert that the client sends nothing for `wait`.
        pub async fn expect_silence(&mut self, wait: Duration) {
            if let Ok(Some(frame)) = tokio::time::timeout(wait, self.from_client.recv()).await {
                panic!("unexpected client frame: {frame}");
            }
        }

        /// Close the connection from the server side.
        pub fn close(&mut self) {
            self.to_client = None;
        }
    }

    pub(crate) struct MemoryConnector {
        servers: mpsc::UnboundedSender<MemoryServer>,
        refuse: bool,
    }

    impl MemoryConnector {
        pub fn new() -> (Self, mpsc::UnboundedReceiver<MemoryServer>) {
            let (servers, rx) = mpsc::unbounded_channel();
            (
                Self {
                    servers,
                    refuse: false,
                },
                rx,
            )
        }

        /// Connector whose every attempt fails.
        pub fn refusing() -> Self {
            let (mut connector, _rx) = Self::new();
            connector.refuse = true;
            connector
        }
    }

    #[async_trait]
    impl Connector for MemoryConnector {
        async fn connect(&self, url: &str, token: Option<&str>) -> Result<FramePair, GatewayError> {
            if self.refuse {
                return Err(GatewayError::Transport(format!("connection refused: {url}")));
            }
            let (to_client, client_rx) = mpsc::unbounded_channel();
            let (client_tx, from_client) = mpsc::unbounded_channel();
            let server = MemoryServer {
                to_client: Some(to_client),
                from_client,
                token: token.map(str::to_string),
            };
            self.servers
                .send(server)
                .map_err(|_| GatewayError::Transport("test server gone".into()))?;
            Ok((
                Box::new(MemorySink { tx: Some(client_tx) }),
                Box::new(MemorySource { rx: client_rx }),
            ))
        }
    }

    struct MemorySink {
        tx: Option<mpsc::UnboundedSender<String>>,
    }

    #[async_trait]
    impl FrameSink for MemorySink {
        async fn send_text(&mut self, text: String) -> Result<(), GatewayError> {
            let tx = self.tx.as_ref().ok_or(GatewayError::ConnectionClosed)?;
            tx.send(text).map_err(|_| GatewayError::ConnectionClosed)
        }

        async fn close(&mut self) -> Result<(), GatewayError> {
            self.tx = None;
            Ok(())
        }
    }

    struct MemorySource {
        rx: mpsc::UnboundedReceiver<Result<String, GatewayError>>,
    }

    #[async_trait]
    impl FrameSource for MemorySource {
        async fn next_text(&mut self) -> Option<Result<String, GatewayError>> {
            self.rx.recv().await
        }
    }
}
