//! Request registry: id allocation and response correlation.
//!
//! Every outgoing request gets the next id and a pending completion. The
//! connection's reader loop hands each decoded [`Message`] to
//! [`RequestRegistry::on_incoming`], which resolves completions by id, so
//! responses may arrive in any order and interleaved with notifications.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc, oneshot};

use crate::protocol::{self, Message, Notification, Request};
use crate::types::RequestError;

pub(crate) enum WriterCommand {
    Send(serde_json::Value),
    Shutdown,
}

type Completion = oneshot::Sender<Result<serde_json::Value, RequestError>>;

/// A notification (or unanswerable server request) forwarded from the server.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerNotification {
    pub method: String,
    pub params: Option<serde_json::Value>,
}

struct PendingRequest {
    method: String,
    params: Option<serde_json::Value>,
    completion: Completion,
}

#[derive(Default)]
struct PendingTable {
    last_id: u64,
    entries: HashMap<u64, PendingRequest>,
    /// Set once by `fail_all`; the registry refuses new work afterwards.
    closed: Option<String>,
}

/// Handle to an in-flight request.
#[derive(Debug)]
pub struct PendingResponse {
    id: u64,
    rx: oneshot::Receiver<Result<serde_json::Value, RequestError>>,
}

impl PendingResponse {
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the matching response, or for the session to end.
    pub async fn wait(self) -> Result<serde_json::Value, RequestError> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(RequestError::SessionClosed(
                "request registry dropped".to_string(),
            )),
        }
    }
}

/// Cloneable handle shared by the session (sending) and the reader loop
/// (resolving).
#[derive(Clone)]
pub struct RequestRegistry {
    table: Arc<Mutex<PendingTable>>,
    writer_tx: mpsc::UnboundedSender<WriterCommand>,
    notification_tx: mpsc::Sender<ServerNotification>,
}

impl RequestRegistry {
    pub(crate) fn new(
        writer_tx: mpsc::UnboundedSender<WriterCommand>,
        notification_tx: mpsc::Sender<ServerNotification>,
    ) -> Self {
        Self {
            table: Arc::new(Mutex::new(PendingTable::default())),
            writer_tx,
            notification_tx,
        }
    }

    /// Allocate an id, record the pending request and queue the frame.
    ///
    /// Allocation and queueing happen under one lock, so frames reach the
    /// server in id order.
    pub async fn send(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<PendingResponse, RequestError> {
        let mut table = self.table.lock().await;
        if let Some(reason) = &table.closed {
            return Err(RequestError::SessionClosed(reason.clone()));
        }

        let id = table.last_id + 1;
        let frame = serde_json::to_value(Request::new(id, method, params.as_ref()))
            .map_err(|e| RequestError::Serialize(e.to_string()))?;
        table.last_id = id;

        if self.writer_tx.send(WriterCommand::Send(frame)).is_err() {
            return Err(RequestError::SessionClosed("writer closed".to_string()));
        }

        let (tx, rx) = oneshot::channel();
        table.entries.insert(
            id,
            PendingRequest {
                method: method.to_string(),
                params,
                completion: tx,
            },
        );
        tracing::debug!(id, method, "Sent request");

        Ok(PendingResponse { id, rx })
    }

    /// Queue a notification. No id, no pending entry.
    pub async fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), RequestError> {
        let table = self.table.lock().await;
        if let Some(reason) = &table.closed {
            return Err(RequestError::SessionClosed(reason.clone()));
        }

        let frame = serde_json::to_value(Notification::new(method, params))
            .map_err(|e| RequestError::Serialize(e.to_string()))?;
        self.writer_tx
            .send(WriterCommand::Send(frame))
            .map_err(|_| RequestError::SessionClosed("writer closed".to_string()))?;
        tracing::debug!(method, "Sent notification");
        Ok(())
    }

    /// Route one decoded message.
    pub async fn on_incoming(&self, message: Message) {
        match message {
            Message::Response { id, result } => {
                let entry = self.table.lock().await.entries.remove(&id);
                let Some(pending) = entry else {
                    tracing::warn!(id, "Discarding stray response with no pending request");
                    return;
                };
                tracing::debug!(id, method = %pending.method, ok = result.is_ok(), "Received response");
                let _ = pending
                    .completion
                    .send(result.map_err(RequestError::Server));
            }
            Message::InvalidResponse { id, reason } => {
                let entry = self.table.lock().await.entries.remove(&id);
                let Some(pending) = entry else {
                    tracing::warn!(id, "Discarding stray unreadable response: {reason}");
                    return;
                };
                tracing::warn!(id, method = %pending.method, "Unreadable response: {reason}");
                let _ = pending
                    .completion
                    .send(Err(RequestError::Protocol(reason)));
            }
            Message::Request { id, method, .. } => {
                // Servers send client/registerCapability, workspace/configuration, etc.
                // We must respond or the server may block.
                tracing::debug!("Server sent request {method}; replying method not found");
                let reply = protocol::method_not_found(&id, &method);
                let _ = self.writer_tx.send(WriterCommand::Send(reply));
            }
            Message::Notification { method, params } => {
                let notification = ServerNotification { method, params };
                if let Err(e) = self.notification_tx.try_send(notification) {
                    tracing::trace!("Dropping server notification: {e}");
                }
            }
        }
    }

    /// Forget a pending request whose caller gave up waiting.
    pub async fn abandon(&self, id: u64) {
        if let Some(pending) = self.table.lock().await.entries.remove(&id) {
            tracing::debug!(id, method = %pending.method, "Abandoned pending request");
        }
    }

    /// Resolve every pending request with a failure and refuse further work.
    pub async fn fail_all(&self, reason: &str) {
        let mut table = self.table.lock().await;
        if table.closed.is_none() {
            table.closed = Some(reason.to_string());
        }
        let reason = table.closed.clone().unwrap_or_default();
        for (id, pending) in table.entries.drain() {
            tracing::debug!(
                id,
                method = %pending.method,
                params = ?pending.params,
                "Failing pending request: {reason}"
            );
            let _ = pending
                .completion
                .send(Err(RequestError::SessionClosed(reason.clone())));
        }
    }

    /// Reason the registry was closed, if it was.
    pub async fn closed_reason(&self) -> Option<String> {
        self.table.lock().await.closed.clone()
    }

    pub async fn pending_count(&self) -> usize {
        self.table.lock().await.entries.len()
    }

    pub(crate) fn shutdown_writer(&self) {
        let _ = self.writer_tx.send(WriterCommand::Shutdown);
    }
}
