//! Individual peer connection management.
//!
//! Each connection splits its WebSocket into a read task, which forwards
//! frames to the mesh as [`ConnectionEvent`]s, and a write task fed by an
//! unbounded channel so senders never wait on the socket.

use futures::{SinkExt, StreamExt};
use replica_core::protocol::Handshake;
use replica_core::{MAX_MESSAGE_SIZE, TransportError};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    WebSocketStream,
    tungstenite::{Error as WsError, Message},
};
use tracing::{debug, error, warn};

/// Internal id for a connection, assigned before the peer is known.
pub type ConnId = u64;

/// Event emitted by a connection.
#[derive(Debug)]
pub enum ConnectionEvent {
    /// Peer sent its handshake
    Handshake { conn_id: ConnId, handshake: Handshake },
    /// Any other frame
    Message { conn_id: ConnId, data: Vec<u8> },
    /// Connection was closed
    Closed { conn_id: ConnId },
}

/// A single WebSocket connection to a peer.
#[derive(Debug)]
pub struct PeerConnection {
    pub conn_id: ConnId,
    outbox: mpsc::UnboundedSender<Message>,
    read_task: Option<JoinHandle<()>>,
}

impl PeerConnection {
    /// Take over a WebSocket stream. Spawns the read and write tasks.
    pub fn spawn<S>(
        conn_id: ConnId,
        ws_stream: WebSocketStream<S>,
        event_tx: mpsc::UnboundedSender<ConnectionEvent>,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut write, read) = ws_stream.split();
        let (outbox, mut queued) = mpsc::unbounded_channel::<Message>();

        tokio::spawn(async move {
            while let Some(msg) = queued.recv().await {
                let closing = matches!(msg, Message::Close(_));
                if let Err(e) = write.send(msg).await {
                    debug!("Write to connection {} failed: {}", conn_id, e);
                    break;
                }
                if closing {
                    break;
                }
            }
        });

        let read_task = tokio::spawn(Self::read_loop(conn_id, read, event_tx));

        Self {
            conn_id,
            outbox,
            read_task: Some(read_task),
        }
    }

    async fn read_loop<S>(
        conn_id: ConnId,
        mut read: futures::stream::SplitStream<WebSocketStream<S>>,
        event_tx: mpsc::UnboundedSender<ConnectionEvent>,
    ) where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        loop {
            match read.next().await {
                Some(Ok(msg)) => {
                    let data = match msg {
                        Message::Binary(data) => data.to_vec(),
                        Message::Text(text) => text.as_bytes().to_vec(),
                        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
                        Message::Close(_) => {
                            debug!("Received close frame on connection {}", conn_id);
                            break;
                        }
                    };

                    if data.len() > MAX_MESSAGE_SIZE {
                        warn!(
                            "Frame on connection {} exceeds max size ({} > {}), dropping",
                            conn_id,
                            data.len(),
                            MAX_MESSAGE_SIZE
                        );
                        continue;
                    }

                    let event = match Handshake::from_json(&data) {
                        Some(handshake) => ConnectionEvent::Handshake { conn_id, handshake },
                        None => ConnectionEvent::Message { conn_id, data },
                    };
                    if event_tx.send(event).is_err() {
                        break;
                    }
                }
                Some(Err(e)) => {
                    match e {
                        WsError::ConnectionClosed | WsError::AlreadyClosed => {
                            debug!("Connection {} closed", conn_id);
                        }
                        _ => error!("WebSocket error on connection {}: {}", conn_id, e),
                    }
                    break;
                }
                None => {
                    debug!("Connection {} stream ended", conn_id);
                    break;
                }
            }
        }

        let _ = event_tx.send(ConnectionEvent::Closed { conn_id });
    }

    /// Queue a binary frame. Fails only once the connection is gone.
    pub fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        self.outbox
            .send(Message::Binary(data.to_vec().into()))
            .map_err(|_| TransportError::Closed)
    }

    pub fn send_handshake(&self, handshake: &Handshake) -> Result<(), TransportError> {
        let data = handshake
            .to_json()
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        self.send(&data)
    }

    /// Send a close frame and stop reading.
    pub fn close(&mut self) {
        let _ = self.outbox.send(Message::Close(None));
        if let Some(task) = self.read_task.take() {
            task.abort();
        }
    }
}

impl Drop for PeerConnection {
    fn drop(&mut self) {
        if let Some(task) = self.read_task.take() {
            task.abort();
        }
    }
}
