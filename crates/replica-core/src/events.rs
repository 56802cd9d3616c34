//! Event infrastructure for replica-core.
//!
//! Provides `ReplicaEvent` for debug/monitoring and `EventBus` for
//! subscriptions. The bus is shared as `Arc<EventBus>` between the sync
//! engine and whoever renders or logs its activity.

use crate::clock::Timestamp;
use crate::protocol::EnvelopeKind;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};

/// Why an inbound frame left the store untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum IgnoreReason {
    /// Sent by this peer and echoed back.
    OwnEcho,
    /// Not newer than this peer's last outgoing mutation.
    Stale,
    /// A snapshot arrived after the first one was applied.
    SnapshotAlreadyReceived,
    /// Applied cleanly but changed nothing.
    NoChange,
    DuplicateChat,
}

/// Replication events emitted by the sync engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ReplicaEvent {
    /// An envelope was built for broadcast or for one peer.
    #[serde(rename_all = "camelCase")]
    EnvelopeSent {
        kind: EnvelopeKind,
        /// Recipient, or `None` for a broadcast.
        to: Option<String>,
        size: usize,
        sent_at: Timestamp,
    },
    /// A remote envelope mutated the local replica.
    #[serde(rename_all = "camelCase")]
    EnvelopeApplied {
        kind: EnvelopeKind,
        origin_id: String,
        sent_at: Timestamp,
    },
    #[serde(rename_all = "camelCase")]
    EnvelopeIgnored {
        kind: Option<EnvelopeKind>,
        origin_id: String,
        reason: IgnoreReason,
    },
    /// An inbound frame failed to decode.
    EnvelopeDropped { size: usize, error: String },
    /// The first snapshot replaced the local tree.
    #[serde(rename_all = "camelCase")]
    SnapshotApplied { origin_id: String, nodes: usize },
    #[serde(rename_all = "camelCase")]
    ChatReceived {
        id: i64,
        author: String,
        origin_id: String,
    },
}

/// Subscription handle that unsubscribes automatically when dropped.
///
/// Follows the disposer pattern: hold this value to keep receiving events,
/// drop it (or let it go out of scope) to unsubscribe.
pub struct Subscription {
    bus: Weak<EventBus>,
    id: usize,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}

type Callback = Arc<dyn Fn(&ReplicaEvent) + Send + Sync>;

/// Event bus for publishing replica events to subscribers.
///
/// Thread-safe for use in multi-threaded Tokio runtime.
/// Wrap in `Arc` to enable subscriptions.
#[derive(Default)]
pub struct EventBus {
    callbacks: RwLock<Vec<(usize, Callback)>>,
    next_id: AtomicUsize,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events. Returns `Subscription` that unsubscribes on drop.
    ///
    /// Requires `self` to be wrapped in `Arc`.
    pub fn subscribe(
        self: &Arc<Self>,
        callback: impl Fn(&ReplicaEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(callback)));
        Subscription {
            bus: Arc::downgrade(self),
            id,
        }
    }

    fn unsubscribe(&self, id: usize) {
        // try_write: Drop may run during unwinding while emit holds a read lock
        if let Ok(mut guard) = self.callbacks.try_write() {
            guard.retain(|(i, _)| *i != id);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.callbacks.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event: ReplicaEvent) {
        // Snapshot the list so a callback may subscribe without deadlocking
        let callbacks: Vec<Callback> = self
            .callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for callback in callbacks {
            callback(&event);
        }
    }
}
