//! SyncEngine: replicates the workspace between peers.
//!
//! The protocol works as follows:
//!
//! 1. Every local mutation (create, delete, rename, content) is applied to
//!    the local store first, then broadcast as a stamped envelope
//! 2. A peer ignores envelopes it sent itself, and any envelope whose
//!    `sentAt` does not exceed the stamp of its own latest outgoing mutation
//! 3. Everything else is replayed through the same store operations local
//!    edits use
//! 4. When a peer joins, peers already present send it the whole tree; the
//!    newcomer applies the first snapshot it receives and ignores the rest
//!
//! The engine does no IO. Outgoing frames are returned as [`Outbound`] values
//! for the caller to hand to a transport.

use crate::PeerId;
use crate::chat::{ChatLog, ChatMessage};
use crate::clock::{Clock, StampSource, SystemClock, Timestamp};
use crate::events::{EventBus, IgnoreReason, ReplicaEvent};
use crate::node::{FileNode, join_path, parent_path};
use crate::protocol::{ChatFrame, DecodeError, EnvelopeKind, Frame, Payload, SyncEnvelope};
use crate::store::ReplicaStore;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No snapshot received yet. Local edits still go out.
    Bootstrapping,
    Live,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Broadcast,
    Peer(PeerId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Envelope(EnvelopeKind),
    Chat,
}

/// An encoded frame ready for the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub route: Route,
    pub kind: FrameKind,
    pub data: Vec<u8>,
}

/// The tree mutation an applied envelope made. Paths are the ones the
/// local store used, so callers can re-key per-path state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeChange {
    Content { path: String },
    Created { path: String },
    Deleted { path: String },
    Renamed { old_path: String, new_path: String },
    /// A snapshot replaced the whole tree.
    Replaced,
}

impl TreeChange {
    pub fn kind(&self) -> EnvelopeKind {
        match self {
            Self::Content { .. } => EnvelopeKind::ContentChanged,
            Self::Created { .. } => EnvelopeKind::NodeCreated,
            Self::Deleted { .. } => EnvelopeKind::NodeDeleted,
            Self::Renamed { .. } => EnvelopeKind::NodeRenamed,
            Self::Replaced => EnvelopeKind::TreeSnapshot,
        }
    }
}

/// What happened to an inbound frame.
#[derive(Debug, PartialEq, Eq)]
pub enum Inbound {
    Applied(TreeChange),
    ChatAppended(i64),
    Ignored(IgnoreReason),
    Dropped(DecodeError),
}

impl Inbound {
    /// True if the frame changed the tree or the chat log.
    pub fn changed(&self) -> bool {
        matches!(self, Self::Applied(_) | Self::ChatAppended(_))
    }
}

pub struct SyncEngine<C: Clock = SystemClock> {
    local_id: PeerId,
    /// Display name attached to outgoing chat.
    author: String,
    store: ReplicaStore,
    chat: ChatLog,
    stamps: StampSource<C>,
    last_sent_at: Timestamp,
    state: SyncState,
    events: Arc<EventBus>,
}

impl<C: Clock> SyncEngine<C> {
    pub fn new(local_id: PeerId, author: impl Into<String>, clock: C) -> Self {
        Self {
            local_id,
            author: author.into(),
            store: ReplicaStore::new(),
            chat: ChatLog::new(),
            stamps: StampSource::new(clock),
            last_sent_at: 0,
            state: SyncState::Bootstrapping,
            events: Arc::new(EventBus::new()),
        }
    }

    pub fn local_id(&self) -> &PeerId {
        &self.local_id
    }

    pub fn author(&self) -> &str {
        &self.author
    }

    pub fn store(&self) -> &ReplicaStore {
        &self.store
    }

    /// Direct access for buffer bookkeeping that is never replicated
    /// (open, close, activate).
    pub fn store_mut(&mut self) -> &mut ReplicaStore {
        &mut self.store
    }

    pub fn chat(&self) -> &ChatLog {
        &self.chat
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn has_received_snapshot(&self) -> bool {
        self.state == SyncState::Live
    }

    /// Stamp of the latest outgoing mutation, 0 before the first.
    pub fn last_sent_at(&self) -> Timestamp {
        self.last_sent_at
    }

    pub fn now(&self) -> Timestamp {
        self.stamps.peek()
    }

    // ==================== Local mutations ====================

    /// Insert a node locally and announce it.
    pub fn create_node(&mut self, node: FileNode) -> Option<Outbound> {
        let path = node.path.clone();
        if !self.store.insert(node) {
            debug!("create_node: {} not inserted", path);
            return None;
        }
        let node = self.store.find(&path)?.clone();
        self.broadcast(Payload::NodeCreated { node })
    }

    /// Delete locally (closing affected buffers) and announce it.
    pub fn delete_node(&mut self, path: &str) -> Option<Outbound> {
        if !self.store.delete(path) {
            return None;
        }
        self.broadcast(Payload::NodeDeleted {
            path: path.to_string(),
        })
    }

    pub fn rename_node(&mut self, old_path: &str, new_name: &str) -> Option<Outbound> {
        if !self.store.rename(old_path, new_name) {
            return None;
        }
        self.broadcast(Payload::NodeRenamed {
            old_path: old_path.to_string(),
            new_name: new_name.to_string(),
        })
    }

    /// Apply a keystroke-level edit locally. Nothing is sent: the caller
    /// debounces and later calls [`publish_content`](Self::publish_content).
    pub fn edit_content(&mut self, path: &str, content: &str) -> bool {
        self.store.update_content(path, content)
    }

    /// Broadcast the settled content of a file.
    pub fn publish_content(&mut self, path: &str, content: &str) -> Option<Outbound> {
        if !self.store.find(path).is_some_and(FileNode::is_file) {
            debug!("publish_content: {} no longer exists", path);
            return None;
        }
        self.broadcast(Payload::ContentChanged {
            path: path.to_string(),
            content: content.to_string(),
        })
    }

    pub fn save_buffer(&mut self, index: usize) -> bool {
        let now = self.stamps.peek();
        self.store.save_buffer(index, now)
    }

    /// Append a local chat message and broadcast it.
    pub fn send_chat(&mut self, body: &str) -> Option<Outbound> {
        let body = body.trim();
        if body.is_empty() {
            return None;
        }
        let id = self.stamps.next();
        self.chat.append(ChatMessage {
            id,
            author: self.author.clone(),
            body: body.to_string(),
            created_at: id,
            origin_is_local: true,
        });

        let frame = ChatFrame::new(id, self.author.clone(), body, id, self.local_id.clone());
        match frame.encode() {
            Ok(data) => Some(Outbound {
                route: Route::Broadcast,
                kind: FrameKind::Chat,
                data,
            }),
            Err(e) => {
                warn!("Failed to encode chat frame: {}", e);
                None
            }
        }
    }

    /// The full tree, addressed to a newly joined peer.
    pub fn snapshot_for(&self, peer: &PeerId) -> Option<Outbound> {
        let nodes = self.store.tree().to_vec();
        let sent_at = self.stamps.peek();
        self.seal(Route::Peer(peer.clone()), Payload::TreeSnapshot { nodes }, sent_at)
    }

    fn broadcast(&mut self, payload: Payload) -> Option<Outbound> {
        let sent_at = self.stamps.next();
        self.last_sent_at = sent_at;
        self.seal(Route::Broadcast, payload, sent_at)
    }

    fn seal(&self, route: Route, payload: Payload, sent_at: Timestamp) -> Option<Outbound> {
        let kind = payload.kind();
        let envelope = SyncEnvelope::new(payload, sent_at, self.local_id.clone());
        let data = match envelope.encode() {
            Ok(data) => data,
            Err(e) => {
                warn!("Failed to encode {} envelope: {}", kind, e);
                return None;
            }
        };

        let to = match &route {
            Route::Broadcast => None,
            Route::Peer(peer) => Some(peer.to_string()),
        };
        debug!("Sending {} ({} bytes) to {:?}", kind, data.len(), to);
        self.events.emit(ReplicaEvent::EnvelopeSent {
            kind,
            to,
            size: data.len(),
            sent_at,
        });

        Some(Outbound {
            route,
            kind: FrameKind::Envelope(kind),
            data,
        })
    }

    // ==================== Inbound ====================

    /// Decode, filter and apply one frame from a peer. Never fails: bad
    /// frames come back as [`Inbound::Dropped`].
    pub fn handle_incoming(&mut self, data: &[u8]) -> Inbound {
        match crate::protocol::decode_frame(data) {
            Ok(Frame::Envelope(envelope)) => self.apply_envelope(envelope),
            Ok(Frame::Chat(frame)) => self.apply_chat(frame),
            Err(e) => {
                warn!("Dropping inbound frame ({} bytes): {}", data.len(), e);
                self.events.emit(ReplicaEvent::EnvelopeDropped {
                    size: data.len(),
                    error: e.to_string(),
                });
                Inbound::Dropped(e)
            }
        }
    }

    fn ignore(&self, kind: Option<EnvelopeKind>, origin: &PeerId, reason: IgnoreReason) -> Inbound {
        debug!("Ignoring {:?} from {}: {:?}", kind, origin, reason);
        self.events.emit(ReplicaEvent::EnvelopeIgnored {
            kind,
            origin_id: origin.to_string(),
            reason,
        });
        Inbound::Ignored(reason)
    }

    fn apply_envelope(&mut self, envelope: SyncEnvelope) -> Inbound {
        let kind = envelope.kind();
        let SyncEnvelope {
            payload,
            sent_at,
            origin_id,
        } = envelope;

        if origin_id == self.local_id {
            return self.ignore(Some(kind), &origin_id, IgnoreReason::OwnEcho);
        }
        if sent_at <= self.last_sent_at {
            return self.ignore(Some(kind), &origin_id, IgnoreReason::Stale);
        }

        let applied = match payload {
            Payload::ContentChanged { path, content } => {
                let applied_at = self.store.find(&path).and_then(|n| n.last_modified);
                if applied_at.is_some_and(|at| sent_at <= at) {
                    return self.ignore(Some(kind), &origin_id, IgnoreReason::Stale);
                }
                self.store
                    .update_content_at(&path, &content, Some(sent_at))
                    .then_some(TreeChange::Content { path })
            }
            Payload::NodeCreated { node } => {
                let path = node.path.clone();
                self.store
                    .insert(node)
                    .then_some(TreeChange::Created { path })
            }
            Payload::NodeDeleted { path } => self
                .store
                .remove(&path)
                .then_some(TreeChange::Deleted { path }),
            Payload::NodeRenamed { old_path, new_name } => {
                let new_path = join_path(parent_path(&old_path), &new_name);
                self.store
                    .rename(&old_path, &new_name)
                    .then_some(TreeChange::Renamed { old_path, new_path })
            }
            Payload::TreeSnapshot { nodes } => {
                if self.has_received_snapshot() {
                    return self.ignore(
                        Some(kind),
                        &origin_id,
                        IgnoreReason::SnapshotAlreadyReceived,
                    );
                }
                self.apply_snapshot(nodes, &origin_id);
                Some(TreeChange::Replaced)
            }
        };

        let Some(change) = applied else {
            return self.ignore(Some(kind), &origin_id, IgnoreReason::NoChange);
        };
        debug!("Applied {} from {} (sentAt {})", kind, origin_id, sent_at);
        self.events.emit(ReplicaEvent::EnvelopeApplied {
            kind,
            origin_id: origin_id.to_string(),
            sent_at,
        });
        Inbound::Applied(change)
    }

    fn apply_snapshot(&mut self, nodes: Vec<FileNode>, origin: &PeerId) {
        let count = nodes.len();
        self.store.reset_all();
        for node in nodes {
            self.store.insert(node);
        }
        self.state = SyncState::Live;
        info!("Applied tree snapshot from {} ({} top-level nodes)", origin, count);
        self.events.emit(ReplicaEvent::SnapshotApplied {
            origin_id: origin.to_string(),
            nodes: count,
        });
    }

    fn apply_chat(&mut self, frame: ChatFrame) -> Inbound {
        let origin = frame.origin_id.clone();
        if origin == self.local_id {
            return self.ignore(None, &origin, IgnoreReason::OwnEcho);
        }
        let (id, author) = (frame.id, frame.author.clone());
        if !self.chat.append(frame.into_message()) {
            return self.ignore(None, &origin, IgnoreReason::DuplicateChat);
        }
        self.events.emit(ReplicaEvent::ChatReceived {
            id,
            author,
            origin_id: origin.to_string(),
        });
        Inbound::ChatAppended(id)
    }

    // ==================== Bootstrap ====================

    /// Replace the tree from the local cache. Sends nothing and leaves the
    /// sync state alone.
    pub fn restore_tree(&mut self, nodes: Vec<FileNode>) -> usize {
        self.store.reset_all();
        nodes
            .into_iter()
            .filter(|node| self.store.insert(node.clone()))
            .count()
    }

    pub fn restore_chat(&mut self, messages: Vec<ChatMessage>) {
        self.chat.replace_all(messages);
    }
}
