//! Wire protocol for peer communication.
//!
//! Every frame is a UTF-8 JSON object:
//! - Sync envelopes carry a `kind` field (see [`envelope`])
//! - Chat frames carry `"type":"chat"` (see [`chat`])
//! - Handshakes open each connection and are handled by the transport

pub mod chat;
pub mod envelope;
pub mod handshake;

pub use chat::ChatFrame;
pub use envelope::{EnvelopeKind, Payload, SyncEnvelope};
pub use handshake::{Handshake, HandshakeRole};

use crate::node::NodeError;
use crate::peer_id::PeerIdError;
use serde_json::Value;
use thiserror::Error;

/// Maximum frame size accepted from a peer (16 MiB).
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Why an inbound frame was dropped.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("empty frame")]
    Empty,

    #[error("frame of {0} bytes exceeds the {MAX_MESSAGE_SIZE} byte limit")]
    TooLarge(usize),

    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    #[error("not an envelope or chat frame")]
    UnrecognizedFrame,

    #[error("unknown envelope kind {0:?}")]
    UnknownKind(String),

    #[error("malformed envelope: {0}")]
    InvalidEnvelope(String),

    #[error("invalid {kind} payload: {reason}")]
    InvalidPayload { kind: EnvelopeKind, reason: String },

    #[error("malformed chat frame: {0}")]
    InvalidChat(String),

    #[error("invalid node: {0}")]
    InvalidNode(#[from] NodeError),

    #[error("invalid origin id: {0}")]
    InvalidOrigin(#[from] PeerIdError),
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Envelope(SyncEnvelope),
    Chat(ChatFrame),
}

/// Decode and validate one inbound frame.
pub fn decode_frame(data: &[u8]) -> Result<Frame, DecodeError> {
    if data.is_empty() {
        return Err(DecodeError::Empty);
    }
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(DecodeError::TooLarge(data.len()));
    }

    let value: Value =
        serde_json::from_slice(data).map_err(|e| DecodeError::InvalidJson(e.to_string()))?;
    let Value::Object(ref object) = value else {
        return Err(DecodeError::UnrecognizedFrame);
    };

    if object.get("type").and_then(Value::as_str) == Some("chat") {
        ChatFrame::from_value(value).map(Frame::Chat)
    } else if object.contains_key("kind") {
        SyncEnvelope::from_value(value).map(Frame::Envelope)
    } else {
        Err(DecodeError::UnrecognizedFrame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_envelope_frame() {
        let data = br#"{"kind":"node_deleted","payload":{"path":"src"},"sentAt":3,"originId":"bob"}"#;
        let Frame::Envelope(envelope) = decode_frame(data).unwrap() else {
            panic!("expected envelope");
        };
        assert_eq!(envelope.kind(), EnvelopeKind::NodeDeleted);
        assert_eq!(envelope.sent_at, 3);
        assert_eq!(envelope.origin_id.as_str(), "bob");
    }

    #[test]
    fn test_decode_chat_frame() {
        let data = br#"{"type":"chat","id":1,"author":"Bob","message":"yo","sentAt":1,"originId":"bob"}"#;
        assert!(matches!(decode_frame(data), Ok(Frame::Chat(_))));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert_eq!(decode_frame(b""), Err(DecodeError::Empty));
        assert!(matches!(decode_frame(b"{oops"), Err(DecodeError::InvalidJson(_))));
        assert!(matches!(decode_frame(&[0xFF, 0xFE]), Err(DecodeError::InvalidJson(_))));
        assert_eq!(decode_frame(b"[1,2]"), Err(DecodeError::UnrecognizedFrame));
        assert_eq!(decode_frame(b"42"), Err(DecodeError::UnrecognizedFrame));
        assert_eq!(
            decode_frame(br#"{"type":"handshake","peerId":"a","role":"host"}"#),
            Err(DecodeError::UnrecognizedFrame)
        );
    }

    #[test]
    fn test_decode_rejects_oversized_frame() {
        let data = vec![b' '; MAX_MESSAGE_SIZE + 1];
        assert_eq!(decode_frame(&data), Err(DecodeError::TooLarge(MAX_MESSAGE_SIZE + 1)));
    }
}
