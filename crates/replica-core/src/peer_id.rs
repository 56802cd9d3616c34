//! PeerId: Identity of a peer in a shared workspace.
//!
//! Identities are opaque strings handed out by whatever provisions the room
//! (a participant name, a token subject). Locally generated ids are 16
//! lowercase hex characters.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

/// Longest identity accepted from the wire, in bytes.
pub const MAX_PEER_ID_LEN: usize = 128;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PeerIdError {
    #[error("Peer ID is empty")]
    Empty,
    #[error("Peer ID exceeds {MAX_PEER_ID_LEN} bytes")]
    TooLong,
    #[error("Peer ID contains a control character")]
    ControlCharacter,
}

/// Identity of a peer.
///
/// # Examples
/// ```
/// use replica_core::PeerId;
///
/// let peer_id = PeerId::generate();
/// assert_eq!(peer_id.as_str().len(), 16);
///
/// let parsed: PeerId = "alice".parse().unwrap();
/// assert_eq!(parsed.as_str(), "alice");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(String);

impl PeerId {
    /// Generate a new random peer ID (16 hex chars).
    pub fn generate() -> Self {
        use rand::Rng;
        let id: u64 = rand::rng().random();
        Self(format!("{:016x}", id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for PeerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PeerId {
    type Err = PeerIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(PeerIdError::Empty);
        }
        if s.len() > MAX_PEER_ID_LEN {
            return Err(PeerIdError::TooLong);
        }
        if s.chars().any(char::is_control) {
            return Err(PeerIdError::ControlCharacter);
        }
        Ok(Self(s.to_string()))
    }
}

impl AsRef<str> for PeerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// Serialize as a plain string so ids read naturally in logs and JSON
impl serde::Serialize for PeerId {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for PeerId {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
