//! Transport trait for peer-to-peer messaging.
//!
//! The replica only needs two delivery modes: everyone, or one named peer.
//! Delivery is best-effort and unordered across peers.
//!
//! Implementations:
//! - `MemoryNetwork` - In-process hub for testing
//! - `Mesh` (in replica-daemon) - WebSocket connections between peers

use crate::PeerId;
use async_trait::async_trait;
use futures::channel::mpsc::{UnboundedReceiver, UnboundedSender, unbounded};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Peer not found: {0}")]
    PeerNotFound(PeerId),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Transport closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, TransportError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Message { from: PeerId, data: Vec<u8> },
    /// A new peer arrived. Only peers already present are told.
    PeerJoined(PeerId),
    PeerLeft(PeerId),
}

/// Inbound side of a transport.
pub type EventStream = UnboundedReceiver<TransportEvent>;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Identity this transport speaks for.
    fn local_id(&self) -> &PeerId;

    /// Send to every connected peer.
    async fn broadcast(&self, data: &[u8]) -> Result<()>;

    /// Send to one peer.
    async fn send_to(&self, peer: &PeerId, data: &[u8]) -> Result<()>;
}

type Inboxes = HashMap<PeerId, UnboundedSender<TransportEvent>>;

/// In-process network for tests. Clones share the same peers.
#[derive(Debug, Clone, Default)]
pub struct MemoryNetwork {
    peers: Arc<Mutex<Inboxes>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    fn inboxes(&self) -> std::sync::MutexGuard<'_, Inboxes> {
        self.peers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register `peer` and announce it to everyone already present.
    pub fn join(&self, peer: PeerId) -> (MemoryTransport, EventStream) {
        let (tx, rx) = unbounded();
        let mut peers = self.inboxes();
        for inbox in peers.values() {
            let _ = inbox.unbounded_send(TransportEvent::PeerJoined(peer.clone()));
        }
        peers.insert(peer.clone(), tx);
        debug!("{} joined memory network ({} peers)", peer, peers.len());

        let transport = MemoryTransport {
            id: peer,
            network: self.clone(),
        };
        (transport, rx)
    }

    pub fn leave(&self, peer: &PeerId) {
        let mut peers = self.inboxes();
        if peers.remove(peer).is_some() {
            for inbox in peers.values() {
                let _ = inbox.unbounded_send(TransportEvent::PeerLeft(peer.clone()));
            }
        }
    }

    pub fn peer_count(&self) -> usize {
        self.inboxes().len()
    }
}

#[derive(Debug, Clone)]
pub struct MemoryTransport {
    id: PeerId,
    network: MemoryNetwork,
}

#[async_trait]
impl Transport for MemoryTransport {
    fn local_id(&self) -> &PeerId {
        &self.id
    }

    async fn broadcast(&self, data: &[u8]) -> Result<()> {
        let peers = self.network.inboxes();
        if !peers.contains_key(&self.id) {
            return Err(TransportError::Closed);
        }
        for (peer, inbox) in peers.iter() {
            if *peer != self.id {
                let _ = inbox.unbounded_send(TransportEvent::Message {
                    from: self.id.clone(),
                    data: data.to_vec(),
                });
            }
        }
        Ok(())
    }

    async fn send_to(&self, peer: &PeerId, data: &[u8]) -> Result<()> {
        let peers = self.network.inboxes();
        let inbox = peers
            .get(peer)
            .ok_or_else(|| TransportError::PeerNotFound(peer.clone()))?;
        inbox
            .unbounded_send(TransportEvent::Message {
                from: self.id.clone(),
                data: data.to_vec(),
            })
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn peer(id: &str) -> PeerId {
        id.parse().unwrap()
    }

    #[tokio::test]
    async fn test_join_notifies_existing_peers_only() {
        let network = MemoryNetwork::new();
        let (_alice, mut alice_events) = network.join(peer("alice"));
        let (_bob, mut bob_events) = network.join(peer("bob"));

        assert_eq!(
            alice_events.next().await,
            Some(TransportEvent::PeerJoined(peer("bob")))
        );
        assert!(bob_events.try_next().is_err());
    }

    #[tokio::test]
    async fn test_broadcast_skips_sender() {
        let network = MemoryNetwork::new();
        let (alice, mut alice_events) = network.join(peer("alice"));
        let (_bob, mut bob_events) = network.join(peer("bob"));
        let _ = alice_events.next().await;

        alice.broadcast(b"hello").await.unwrap();

        assert_eq!(
            bob_events.next().await,
            Some(TransportEvent::Message {
                from: peer("alice"),
                data: b"hello".to_vec()
            })
        );
        assert!(alice_events.try_next().is_err());
    }

    #[tokio::test]
    async fn test_send_to_unknown_peer() {
        let network = MemoryNetwork::new();
        let (alice, _events) = network.join(peer("alice"));
        let err = alice.send_to(&peer("nobody"), b"x").await.unwrap_err();
        assert!(matches!(err, TransportError::PeerNotFound(_)));
    }

    #[tokio::test]
    async fn test_leave_notifies_and_closes() {
        let network = MemoryNetwork::new();
        let (alice, mut alice_events) = network.join(peer("alice"));
        let (bob, _bob_events) = network.join(peer("bob"));
        let _ = alice_events.next().await;

        network.leave(&peer("bob"));
        assert_eq!(
            alice_events.next().await,
            Some(TransportEvent::PeerLeft(peer("bob")))
        );
        assert!(matches!(bob.broadcast(b"x").await, Err(TransportError::Closed)));
        assert!(alice.send_to(&peer("bob"), b"x").await.is_err());
        assert_eq!(network.peer_count(), 1);
    }
}
