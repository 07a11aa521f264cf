//! Standalone WebSocket transport.
//!
//! Each [`SocketHandle`] owns one background task that connects, forwards
//! inbound text frames to an [`EventSink`], and writes outbound frames. The
//! task reports its lifecycle as [`SocketEvent`]s tagged with the socket's
//! [`SocketId`], so the owner can ignore events from a socket it has already
//! replaced or detached.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::TransportError;

/// Identifies one socket instance for the lifetime of its owner.
pub type SocketId = u64;

/// Lifecycle and data events emitted by a socket task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    /// Handshake completed.
    Open,
    /// A text frame arrived.
    Message(String),
    /// Connect or I/O failure. Always followed by `Closed`.
    Error(TransportError),
    /// The socket is gone. Emitted exactly once per socket, last.
    Closed,
}

/// Receives events from socket tasks.
pub type EventSink = Arc<dyn Fn(SocketId, SocketEvent) + Send + Sync>;

enum SocketCommand {
    Send(String),
    Close,
}

/// Handle to a running socket task.
///
/// Dropping the handle closes the socket.
#[derive(Debug)]
pub struct SocketHandle {
    id: SocketId,
    commands: mpsc::UnboundedSender<SocketCommand>,
    task: JoinHandle<()>,
}

impl SocketHandle {
    /// Spawn a socket task connecting to `url` on the given runtime.
    ///
    /// Returns immediately; the outcome of the connect attempt arrives as a
    /// `SocketEvent` on `sink`. Frames sent before the handshake completes
    /// are queued and written once the socket is open.
    pub fn connect(id: SocketId, url: Url, sink: EventSink, runtime: &Handle) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let task = runtime.spawn(run_socket(id, url, sink, command_rx));
        Self { id, commands, task }
    }

    pub fn id(&self) -> SocketId {
        self.id
    }

    /// Queue a text frame for sending.
    pub fn send(&self, frame: String) -> Result<(), TransportError> {
        self.commands
            .send(SocketCommand::Send(frame))
            .map_err(|_| TransportError::Closed)
    }

    /// Close the socket.
    ///
    /// Asks the task to send a close frame; if the task no longer accepts
    /// commands it is aborted instead. Fails only when the task has already
    /// finished.
    pub fn close(self) -> Result<(), TransportError> {
        if self.commands.send(SocketCommand::Close).is_ok() {
            return Ok(());
        }
        if !self.task.is_finished() {
            self.task.abort();
            return Ok(());
        }
        Err(TransportError::Closed)
    }
}

async fn run_socket(
    id: SocketId,
    url: Url,
    sink: EventSink,
    mut commands: mpsc::UnboundedReceiver<SocketCommand>,
) {
    debug!("Socket {id} connecting to {url}");

    let stream = match connect_async(url.as_str()).await {
        Ok((stream, _)) => stream,
        Err(e) => {
            warn!("Socket {id} failed to connect to {url}: {e}");
            sink(id, SocketEvent::Error(TransportError::Connect(e.to_string())));
            sink(id, SocketEvent::Closed);
            return;
        }
    };

    info!("Socket {id} connected to {url}");
    sink(id, SocketEvent::Open);

    let (mut ws_tx, mut ws_rx) = stream.split();

    loop {
        tokio::select! {
            command = commands.recv() => {
                match command {
                    Some(SocketCommand::Send(frame)) => {
                        if let Err(e) = ws_tx.send(WsMessage::Text(frame.into())).await {
                            warn!("Socket {id} write failed: {e}");
                            sink(id, SocketEvent::Error(TransportError::Socket(e.to_string())));
                            break;
                        }
                    }
                    Some(SocketCommand::Close) | None => {
                        let _ = ws_tx.send(WsMessage::Close(None)).await;
                        debug!("Socket {id} closed locally");
                        break;
                    }
                }
            }

            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        sink(id, SocketEvent::Message(text.to_string()));
                    }
                    Some(Ok(WsMessage::Ping(data))) => {
                        let _ = ws_tx.send(WsMessage::Pong(data)).await;
                    }
                    Some(Ok(WsMessage::Close(_))) | None => {
                        debug!("Socket {id} closed by server");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!("Socket {id} error: {e}");
                        sink(id, SocketEvent::Error(TransportError::Socket(e.to_string())));
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    sink(id, SocketEvent::Closed);
}
