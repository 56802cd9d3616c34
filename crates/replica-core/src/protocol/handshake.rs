//! Connection handshake.
//!
//! Each side of a new connection sends one handshake as its first frame,
//! before any envelope or chat frame.

use crate::PeerId;
use serde::{Deserialize, Serialize};

/// Which side of the connection a peer is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HandshakeRole {
    /// Accepted the connection; already part of the session.
    Host,
    /// Dialled in; catches up from a snapshot.
    Joiner,
}

/// Wire format: `{"type":"handshake","peerId":"alice","role":"host"}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    #[serde(rename = "type")]
    msg_type: String,
    pub peer_id: PeerId,
    pub role: HandshakeRole,
}

impl Handshake {
    pub fn new(peer_id: PeerId, role: HandshakeRole) -> Self {
        Self {
            msg_type: "handshake".to_string(),
            peer_id,
            role,
        }
    }

    pub fn host(peer_id: PeerId) -> Self {
        Self::new(peer_id, HandshakeRole::Host)
    }

    pub fn joiner(peer_id: PeerId) -> Self {
        Self::new(peer_id, HandshakeRole::Joiner)
    }

    /// Serialize to JSON bytes.
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Try to parse from JSON bytes. `None` unless it is a handshake.
    pub fn from_json(data: &[u8]) -> Option<Self> {
        let handshake: Self = serde_json::from_slice(data).ok()?;
        (handshake.msg_type == "handshake").then_some(handshake)
    }
}
