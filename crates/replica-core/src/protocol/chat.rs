//! Chat frames travel beside the sync envelopes.
//!
//! Wire format: `{"type":"chat","id":1700000000000,"author":"Jane","message":"hi","sentAt":1700000000000,"originId":"alice"}`

use super::DecodeError;
use crate::PeerId;
use crate::chat::ChatMessage;
use crate::clock::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ChatFrame {
    #[serde(rename = "type")]
    msg_type: String,
    pub id: i64,
    pub author: String,
    pub message: String,
    pub sent_at: Timestamp,
    pub origin_id: PeerId,
}

impl ChatFrame {
    pub fn new(
        id: i64,
        author: impl Into<String>,
        message: impl Into<String>,
        sent_at: Timestamp,
        origin_id: PeerId,
    ) -> Self {
        Self {
            msg_type: "chat".to_string(),
            id,
            author: author.into(),
            message: message.into(),
            sent_at,
            origin_id,
        }
    }

    /// Serialize to JSON bytes.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub(crate) fn from_value(value: Value) -> Result<Self, DecodeError> {
        let frame: Self =
            serde_json::from_value(value).map_err(|e| DecodeError::InvalidChat(e.to_string()))?;
        if frame.msg_type != "chat" {
            return Err(DecodeError::UnrecognizedFrame);
        }
        Ok(frame)
    }

    /// The message as stored by a receiving peer.
    pub fn into_message(self) -> ChatMessage {
        ChatMessage {
            id: self.id,
            author: self.author,
            body: self.message,
            created_at: self.sent_at,
            origin_is_local: false,
        }
    }
}
