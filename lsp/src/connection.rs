//! Connection: one writer task and one demultiplexing reader task over a
//! byte stream pair.
//!
//! The reader feeds the framer continuously and dispatches every decoded
//! message through the [`RequestRegistry`]. Nothing else reads the stream, so
//! each response is delivered exactly once.

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::codec::{FrameReader, FrameWriter};
use crate::protocol::Message;
use crate::registry::{RequestRegistry, ServerNotification, WriterCommand};

const NOTIFICATION_CHANNEL_CAPACITY: usize = 256;

pub struct Connection {
    registry: RequestRegistry,
    notifications: mpsc::Receiver<ServerNotification>,
    reader_handle: JoinHandle<()>,
    writer_handle: JoinHandle<()>,
}

impl Connection {
    /// Start the reader and writer tasks. `name` labels log lines.
    ///
    /// When the stream ends or breaks, every pending request is failed.
    pub fn spawn<R, W>(reader: R, writer: W, name: &str) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self::spawn_inner(reader, writer, name, None)
    }

    /// Like [`Connection::spawn`], but the end of the stream is reported on
    /// the returned channel instead of closing the registry. The owner of the
    /// process closes it, so pending requests fail with the exit report.
    pub(crate) fn spawn_supervised<R, W>(
        reader: R,
        writer: W,
        name: &str,
    ) -> (Self, mpsc::UnboundedReceiver<String>)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (ended_tx, ended_rx) = mpsc::unbounded_channel();
        let connection = Self::spawn_inner(reader, writer, name, Some(ended_tx));
        (connection, ended_rx)
    }

    fn spawn_inner<R, W>(
        reader: R,
        writer: W,
        name: &str,
        ended: Option<mpsc::UnboundedSender<String>>,
    ) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (writer_tx, mut writer_rx) = mpsc::unbounded_channel::<WriterCommand>();
        let (notification_tx, notifications) = mpsc::channel(NOTIFICATION_CHANNEL_CAPACITY);
        let registry = RequestRegistry::new(writer_tx, notification_tx);

        let writer_end = StreamEnd {
            registry: registry.clone(),
            ended: ended.clone(),
        };
        let writer_name = name.to_string();
        let writer_handle = tokio::spawn(async move {
            let mut writer = FrameWriter::new(writer);
            while let Some(cmd) = writer_rx.recv().await {
                match cmd {
                    WriterCommand::Send(frame) => {
                        if let Err(e) = writer.write_frame(&frame).await {
                            tracing::warn!("LSP write error for '{writer_name}': {e:#}");
                            writer_end
                                .report(format!("failed to write to {writer_name}: {e}"))
                                .await;
                            break;
                        }
                    }
                    WriterCommand::Shutdown => break,
                }
            }
        });

        let reader_registry = registry.clone();
        let reader_end = StreamEnd {
            registry: registry.clone(),
            ended,
        };
        let reader_name = name.to_string();
        let reader_handle = tokio::spawn(async move {
            let mut reader = FrameReader::new(reader);
            loop {
                match reader.read_frame().await {
                    Ok(Some(frame)) => match Message::from_value(frame) {
                        Some(message) => reader_registry.on_incoming(message).await,
                        None => {
                            tracing::trace!("Ignoring malformed JSON-RPC frame from '{reader_name}'");
                        }
                    },
                    Ok(None) => {
                        tracing::info!("LSP server '{reader_name}' closed stdout");
                        reader_end
                            .report(format!("{reader_name} closed its output stream"))
                            .await;
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("LSP reader error for '{reader_name}': {e:#}");
                        reader_end
                            .report(format!("transport error from {reader_name}: {e}"))
                            .await;
                        break;
                    }
                }
            }
        });

        Self {
            registry,
            notifications,
            reader_handle,
            writer_handle,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &RequestRegistry {
        &self.registry
    }

    /// Drain pending server notifications, up to `budget`. Non-blocking.
    pub fn drain_notifications(&mut self, budget: usize) -> Vec<ServerNotification> {
        let mut drained = Vec::new();
        while drained.len() < budget {
            match self.notifications.try_recv() {
                Ok(notification) => drained.push(notification),
                Err(mpsc::error::TryRecvError::Empty | mpsc::error::TryRecvError::Disconnected) => {
                    break;
                }
            }
        }
        drained
    }

    /// Stop both tasks and fail anything still pending.
    pub async fn close(&mut self, reason: &str) {
        self.registry.fail_all(reason).await;
        self.registry.shutdown_writer();
        self.reader_handle.abort();
    }

    /// Whether the writer task has finished (stream closed or shut down).
    #[must_use]
    pub fn is_writer_finished(&self) -> bool {
        self.writer_handle.is_finished()
    }
}

/// Where a reader or writer task reports that the stream is gone.
struct StreamEnd {
    registry: RequestRegistry,
    ended: Option<mpsc::UnboundedSender<String>>,
}

impl StreamEnd {
    async fn report(&self, reason: String) {
        let reason = match &self.ended {
            Some(ended) => match ended.send(reason) {
                Ok(()) => return,
                Err(mpsc::error::SendError(reason)) => reason,
            },
            None => reason,
        };
        self.registry.fail_all(&reason).await;
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader_handle.abort();
        self.writer_handle.abort();
    }
}
