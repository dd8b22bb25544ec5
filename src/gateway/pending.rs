//! Request/response multiplexer.
//!
//! Outstanding requests are registered here under a fresh identifier before
//! their frame is sent. The listener resolves them through
//! [`PendingTable::resolve`]; callers hold a [`PendingGuard`] that removes the
//! entry when they give up, so an entry is never left behind after a timeout
//! and a late reply finds nothing to resolve.

use futures_util::Stream;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

use super::error::GatewayError;
use super::protocol::{self, Response};

/// Item queued on a streamed entry.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem {
    Chunk(String),
    End,
}

enum Slot {
    Single(oneshot::Sender<Result<Value, GatewayError>>),
    Streamed(mpsc::UnboundedSender<StreamItem>),
}

/// Identifier → resolution slot, shared by callers and the listener.
#[derive(Default)]
pub struct PendingTable {
    slots: Mutex<HashMap<String, Slot>>,
}

impl PendingTable {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Insert `slot` under a fresh identifier not currently in use.
    fn insert(self: &Arc<Self>, slot: Slot) -> PendingGuard {
        let mut slots = self.slots.lock();
        let id = loop {
            let candidate = uuid::Uuid::new_v4().to_string();
            if !slots.contains_key(&candidate) {
                break candidate;
            }
        };
        slots.insert(id.clone(), slot);
        PendingGuard {
            table: Arc::clone(self),
            id,
        }
    }

    /// Register a single-reply request.
    pub fn register_single(
        self: &Arc<Self>,
    ) -> (PendingGuard, oneshot::Receiver<Result<Value, GatewayError>>) {
        let (tx, rx) = oneshot::channel();
        (self.insert(Slot::Single(tx)), rx)
    }

    /// Register a streamed request.
    pub fn register_streamed(self: &Arc<Self>) -> (PendingGuard, mpsc::UnboundedReceiver<StreamItem>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (self.insert(Slot::Streamed(tx)), rx)
    }

    /// Deliver a response to its entry. Returns `false` when no entry matches.
    ///
    /// Single entries are removed on delivery. Streamed entries get the chunk
    /// (if any) and, on an end signal or failure, the end marker; they are
    /// removed once the reader dequeues that marker.
    pub fn resolve(&self, response: &Response) -> bool {
        let mut slots = self.slots.lock();

        if let Some(Slot::Streamed(tx)) = slots.get(&response.id) {
            if response.ok {
                if let Some(text) = response.payload.as_ref().and_then(protocol::chunk_text) {
                    let _ = tx.send(StreamItem::Chunk(text));
                }
                if response.end {
                    let _ = tx.send(StreamItem::End);
                }
            } else {
                tracing::warn!(
                    request_id = %response.id,
                    error = response.error.as_deref().unwrap_or_default(),
                    "Gateway stream failed"
                );
                let _ = tx.send(StreamItem::End);
            }
            return true;
        }

        match slots.remove(&response.id) {
            Some(Slot::Single(tx)) => {
                let outcome = if response.ok {
                    Ok(response.payload.clone().unwrap_or_else(|| serde_json::json!({})))
                } else {
                    Err(GatewayError::Remote(
                        response.error.clone().unwrap_or_else(|| "request failed".into()),
                    ))
                };
                // The caller may have given up already; its guard handles cleanup.
                let _ = tx.send(outcome);
                true
            }
            Some(streamed) => {
                slots.insert(response.id.clone(), streamed);
                true
            }
            None => false,
        }
    }

    /// Remove an entry. Idempotent.
    pub fn remove(&self, id: &str) -> bool {
        self.slots.lock().remove(id).is_some()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.slots.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Owns one pending entry; removes it on drop.
pub struct PendingGuard {
    table: Arc<PendingTable>,
    id: String,
}

impl PendingGuard {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.table.remove(&self.id);
    }
}

// ── Streamed responses ─────────────────────────────────────────────

/// Lazy, finite sequence of reply chunks for one streamed request.
///
/// Each chunk is awaited with the request timeout. The stream ends when the
/// end marker is dequeued or a chunk times out (yielding one
/// [`GatewayError::RequestTimeout`]); afterwards it only yields `None`.
pub struct ResponseStream {
    rx: mpsc::UnboundedReceiver<StreamItem>,
    guard: Option<PendingGuard>,
    timeout: Duration,
}

impl ResponseStream {
    pub(crate) fn new(
        guard: PendingGuard,
        rx: mpsc::UnboundedReceiver<StreamItem>,
        timeout: Duration,
    ) -> Self {
        Self {
            rx,
            guard: Some(guard),
            timeout,
        }
    }

    /// Identifier of the underlying request, `None` once finished.
    pub fn request_id(&self) -> Option<&str> {
        self.guard.as_ref().map(PendingGuard::id)
    }

    pub fn is_finished(&self) -> bool {
        self.guard.is_none()
    }

    /// Next chunk, `None` once the stream has ended.
    pub async fn next_chunk(&mut self) -> Option<Result<String, GatewayError>> {
        self.guard.as_ref()?;
        match tokio::time::timeout(self.timeout, self.rx.recv()).await {
            Ok(Some(StreamItem::Chunk(text))) => Some(Ok(text)),
            Ok(Some(StreamItem::End) | None) => {
                self.guard = None;
                None
            }
            Err(_) => {
                if let Some(guard) = self.guard.take() {
                    tracing::warn!(request_id = %guard.id(), "Timed out waiting for gateway stream chunk");
                }
                Some(Err(GatewayError::RequestTimeout(self.timeout)))
            }
        }
    }

    /// Drain the stream and concatenate its chunks.
    pub async fn collect_text(mut self) -> Result<String, GatewayError> {
        let mut text = String::new();
        while let Some(chunk) = self.next_chunk().await {
            text.push_str(&chunk?);
        }
        Ok(text)
    }

    /// Adapt into a [`Stream`] of chunks.
    pub fn into_stream(self) -> impl Stream<Item = Result<String, GatewayError>> + Send {
        futures_util::stream::unfold(self, |mut this| async move {
            let item = this.next_chunk().await?;
            Some((item, this))
        })
    }
}
