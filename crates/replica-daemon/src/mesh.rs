//! WebSocket mesh transport.
//!
//! Manages connection lifecycle, peer ID mapping, and message routing.
//! A peer may listen for connections and dial any number of other peers.
//! Both sides open with a handshake; the handshake lifecycle is
//! encapsulated, so the session only sees [`TransportEvent`]s carrying
//! resolved peer IDs.
//!
//! Only the accepting side reports [`TransportEvent::PeerJoined`]: the peer
//! that was already running sends the snapshot, the one that dialled in
//! receives it.

use crate::connection::{ConnId, ConnectionEvent, PeerConnection};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::channel::mpsc::{UnboundedSender, unbounded};
use replica_core::protocol::{Handshake, HandshakeRole};
use replica_core::transport::{EventStream, Transport, TransportError, TransportEvent};
use replica_core::PeerId;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{accept_async, connect_async};
use tracing::{debug, error, info, warn};

#[derive(Debug, Default)]
struct MeshState {
    /// Connections whose handshake has not arrived yet
    pending: HashMap<ConnId, PeerConnection>,
    /// Post-handshake connections indexed by peer ID
    peers: HashMap<PeerId, PeerConnection>,
    /// Resolves messages and closes to a peer
    conn_to_peer: HashMap<ConnId, PeerId>,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<MeshState>,
    conn_tx: mpsc::UnboundedSender<ConnectionEvent>,
    next_conn_id: AtomicU64,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// A peer's connections to the rest of the session. Clones share them.
#[derive(Debug, Clone)]
pub struct Mesh {
    local_id: PeerId,
    shared: Arc<Shared>,
}

impl Mesh {
    /// Create an idle mesh. Must be called inside a tokio runtime.
    pub fn new(local_id: PeerId) -> (Self, EventStream) {
        let (conn_tx, conn_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = unbounded();

        let mesh = Self {
            local_id,
            shared: Arc::new(Shared {
                state: Mutex::new(MeshState::default()),
                conn_tx,
                next_conn_id: AtomicU64::new(1),
                tasks: Mutex::new(Vec::new()),
            }),
        };

        let router = tokio::spawn(mesh.clone().route(conn_rx, events_tx));
        mesh.track(router);
        (mesh, events_rx)
    }

    fn state(&self) -> MutexGuard<'_, MeshState> {
        self.shared.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn track(&self, task: JoinHandle<()>) {
        self.shared
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(task);
    }

    fn next_conn_id(&self) -> ConnId {
        self.shared.next_conn_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Bind `addr` and accept peers in the background. Returns the bound
    /// address (useful with port 0).
    pub async fn listen(&self, addr: &str) -> Result<SocketAddr> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;
        let local_addr = listener.local_addr()?;
        info!("Listening for peers on {}", local_addr);

        let mesh = self.clone();
        let task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        let mesh = mesh.clone();
                        tokio::spawn(async move { mesh.accept_connection(stream, addr).await });
                    }
                    Err(e) => error!("Failed to accept connection: {}", e),
                }
            }
        });
        self.track(task);
        Ok(local_addr)
    }

    async fn accept_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let ws_stream = match accept_async(stream).await {
            Ok(ws) => ws,
            Err(e) => {
                // Port scanners connect and close without upgrading
                debug!("WebSocket upgrade failed for {}: {}", addr, e);
                return;
            }
        };

        let conn_id = self.next_conn_id();
        info!("New connection from {} (conn {})", addr, conn_id);

        // Hold the lock so the router cannot see the handshake before the
        // connection is registered
        let mut state = self.state();
        let conn = PeerConnection::spawn(conn_id, ws_stream, self.shared.conn_tx.clone());
        if let Err(e) = conn.send_handshake(&Handshake::host(self.local_id.clone())) {
            warn!("Failed to send handshake on conn {}: {}", conn_id, e);
            return;
        }
        state.pending.insert(conn_id, conn);
    }

    /// Dial a peer at a `ws://` URL.
    pub async fn connect(&self, url: &str) -> Result<()> {
        let (ws_stream, _) = connect_async(url)
            .await
            .with_context(|| format!("Failed to connect to {}", url))?;

        let conn_id = self.next_conn_id();
        info!("Connected to {} (conn {})", url, conn_id);

        let mut state = self.state();
        let conn = PeerConnection::spawn(conn_id, ws_stream, self.shared.conn_tx.clone());
        conn.send_handshake(&Handshake::joiner(self.local_id.clone()))?;
        state.pending.insert(conn_id, conn);
        Ok(())
    }

    /// Resolve connection events into transport events until shut down.
    async fn route(
        self,
        mut conn_rx: mpsc::UnboundedReceiver<ConnectionEvent>,
        events_tx: UnboundedSender<TransportEvent>,
    ) {
        while let Some(event) = conn_rx.recv().await {
            let resolved = match event {
                ConnectionEvent::Handshake { conn_id, handshake } => {
                    self.on_handshake(conn_id, handshake)
                }
                ConnectionEvent::Message { conn_id, data } => {
                    match self.state().conn_to_peer.get(&conn_id) {
                        Some(from) => Some(TransportEvent::Message {
                            from: from.clone(),
                            data,
                        }),
                        None => {
                            debug!("Dropping frame from conn {} before handshake", conn_id);
                            None
                        }
                    }
                }
                ConnectionEvent::Closed { conn_id } => self.on_closed(conn_id),
            };

            if let Some(event) = resolved {
                if events_tx.unbounded_send(event).is_err() {
                    debug!("Event stream dropped, stopping mesh router");
                    break;
                }
            }
        }
    }

    fn on_handshake(&self, conn_id: ConnId, handshake: Handshake) -> Option<TransportEvent> {
        let mut state = self.state();
        let Some(mut conn) = state.pending.remove(&conn_id) else {
            debug!("Ignoring repeated handshake on conn {}", conn_id);
            return None;
        };

        let peer_id = handshake.peer_id;
        if peer_id == self.local_id {
            warn!("Conn {} is a connection to ourselves, closing", conn_id);
            conn.close();
            return None;
        }
        if state.peers.contains_key(&peer_id) {
            info!("Already connected to {}, closing duplicate conn {}", peer_id, conn_id);
            conn.close();
            return None;
        }

        state.conn_to_peer.insert(conn_id, peer_id.clone());
        state.peers.insert(peer_id.clone(), conn);

        match handshake.role {
            HandshakeRole::Joiner => {
                info!("Peer joined: {}", peer_id);
                Some(TransportEvent::PeerJoined(peer_id))
            }
            HandshakeRole::Host => {
                info!("Connected to host {}", peer_id);
                None
            }
        }
    }

    fn on_closed(&self, conn_id: ConnId) -> Option<TransportEvent> {
        let mut state = self.state();
        match state.conn_to_peer.remove(&conn_id) {
            Some(peer_id) => {
                state.peers.remove(&peer_id);
                info!("Peer disconnected: {}", peer_id);
                Some(TransportEvent::PeerLeft(peer_id))
            }
            None => {
                state.pending.remove(&conn_id);
                debug!("Conn {} closed before handshake", conn_id);
                None
            }
        }
    }

    /// Number of peers with a completed handshake.
    pub fn peer_count(&self) -> usize {
        self.state().peers.len()
    }

    pub fn connected_peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self.state().peers.keys().cloned().collect();
        peers.sort();
        peers
    }

    /// Close every connection and stop background tasks.
    pub fn shutdown(&self) {
        for task in self
            .shared
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
        {
            task.abort();
        }
        let mut state = self.state();
        for (_, mut conn) in state.pending.drain() {
            conn.close();
        }
        for (_, mut conn) in state.peers.drain() {
            conn.close();
        }
        state.conn_to_peer.clear();
    }
}

#[async_trait]
impl Transport for Mesh {
    fn local_id(&self) -> &PeerId {
        &self.local_id
    }

    async fn broadcast(&self, data: &[u8]) -> replica_core::transport::Result<()> {
        let state = self.state();
        for (peer_id, conn) in &state.peers {
            if let Err(e) = conn.send(data) {
                warn!("Failed to broadcast to {}: {}", peer_id, e);
            }
        }
        Ok(())
    }

    async fn send_to(&self, peer: &PeerId, data: &[u8]) -> replica_core::transport::Result<()> {
        let state = self.state();
        let conn = state
            .peers
            .get(peer)
            .ok_or_else(|| TransportError::PeerNotFound(peer.clone()))?;
        conn.send(data)
    }
}
