//! Sync envelopes: the five mutation kinds exchanged between peers.
//!
//! Wire format: `{"kind":"node_renamed","payload":{"oldPath":"a","newName":"b"},"sentAt":1700000000000,"originId":"alice"}`
//!
//! Decoding is strict. The top level must hold exactly `kind`, `payload`,
//! `sentAt` and `originId`, and the payload exactly the fields of its kind.

use super::DecodeError;
use crate::PeerId;
use crate::clock::Timestamp;
use crate::node::FileNode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    ContentChanged,
    NodeCreated,
    NodeDeleted,
    NodeRenamed,
    TreeSnapshot,
}

impl EnvelopeKind {
    pub const ALL: [EnvelopeKind; 5] = [
        Self::ContentChanged,
        Self::NodeCreated,
        Self::NodeDeleted,
        Self::NodeRenamed,
        Self::TreeSnapshot,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ContentChanged => "content_changed",
            Self::NodeCreated => "node_created",
            Self::NodeDeleted => "node_deleted",
            Self::NodeRenamed => "node_renamed",
            Self::TreeSnapshot => "tree_snapshot",
        }
    }

    fn parse(kind: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == kind)
    }
}

impl fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind-specific envelope body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged, rename_all_fields = "camelCase")]
pub enum Payload {
    ContentChanged { path: String, content: String },
    NodeCreated { node: FileNode },
    NodeDeleted { path: String },
    NodeRenamed { old_path: String, new_name: String },
    TreeSnapshot { nodes: Vec<FileNode> },
}

impl Payload {
    pub fn kind(&self) -> EnvelopeKind {
        match self {
            Self::ContentChanged { .. } => EnvelopeKind::ContentChanged,
            Self::NodeCreated { .. } => EnvelopeKind::NodeCreated,
            Self::NodeDeleted { .. } => EnvelopeKind::NodeDeleted,
            Self::NodeRenamed { .. } => EnvelopeKind::NodeRenamed,
            Self::TreeSnapshot { .. } => EnvelopeKind::TreeSnapshot,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncEnvelope {
    pub payload: Payload,
    pub sent_at: Timestamp,
    pub origin_id: PeerId,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireEnvelope<'a> {
    kind: EnvelopeKind,
    payload: &'a Payload,
    sent_at: Timestamp,
    origin_id: &'a PeerId,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawEnvelope {
    kind: String,
    payload: Value,
    sent_at: Timestamp,
    origin_id: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ContentChangedBody {
    path: String,
    content: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct NodeCreatedBody {
    node: FileNode,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct NodeDeletedBody {
    path: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct NodeRenamedBody {
    old_path: String,
    new_name: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct TreeSnapshotBody {
    nodes: Vec<FileNode>,
}

fn body<T: DeserializeOwned>(kind: EnvelopeKind, payload: Value) -> Result<T, DecodeError> {
    serde_json::from_value(payload).map_err(|e| DecodeError::InvalidPayload {
        kind,
        reason: e.to_string(),
    })
}

impl SyncEnvelope {
    pub fn new(payload: Payload, sent_at: Timestamp, origin_id: PeerId) -> Self {
        Self {
            payload,
            sent_at,
            origin_id,
        }
    }

    pub fn kind(&self) -> EnvelopeKind {
        self.payload.kind()
    }

    /// Serialize to JSON bytes.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&WireEnvelope {
            kind: self.kind(),
            payload: &self.payload,
            sent_at: self.sent_at,
            origin_id: &self.origin_id,
        })
    }

    /// Validate and convert an already-parsed JSON object.
    pub(crate) fn from_value(value: Value) -> Result<Self, DecodeError> {
        let raw: RawEnvelope =
            serde_json::from_value(value).map_err(|e| DecodeError::InvalidEnvelope(e.to_string()))?;
        let kind = EnvelopeKind::parse(&raw.kind).ok_or(DecodeError::UnknownKind(raw.kind))?;
        let origin_id: PeerId = raw.origin_id.parse()?;

        let payload = match kind {
            EnvelopeKind::ContentChanged => {
                let b: ContentChangedBody = body(kind, raw.payload)?;
                Payload::ContentChanged {
                    path: b.path,
                    content: b.content,
                }
            }
            EnvelopeKind::NodeCreated => {
                let b: NodeCreatedBody = body(kind, raw.payload)?;
                b.node.validate()?;
                Payload::NodeCreated { node: b.node }
            }
            EnvelopeKind::NodeDeleted => {
                let b: NodeDeletedBody = body(kind, raw.payload)?;
                Payload::NodeDeleted { path: b.path }
            }
            EnvelopeKind::NodeRenamed => {
                let b: NodeRenamedBody = body(kind, raw.payload)?;
                Payload::NodeRenamed {
                    old_path: b.old_path,
                    new_name: b.new_name,
                }
            }
            EnvelopeKind::TreeSnapshot => {
                let b: TreeSnapshotBody = body(kind, raw.payload)?;
                b.nodes.iter().try_for_each(FileNode::validate)?;
                Payload::TreeSnapshot { nodes: b.nodes }
            }
        };

        Ok(Self {
            payload,
            sent_at: raw.sent_at,
            origin_id,
        })
    }
}
