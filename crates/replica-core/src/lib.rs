//! replica-core: Peer-to-peer replication of a shared workspace.
//!
//! This crate provides the core functionality for:
//! - Keeping a local replica of a file tree, open buffers and chat log
//! - Encoding and validating the envelopes peers exchange
//! - Applying remote mutations with a last-write-wins guard
//! - Bringing late joiners up to date with a full-tree snapshot
//! - Debouncing content edits and restoring state from a local cache
//!
//! Nothing here performs IO on its own. Transports and cache backends are
//! trait abstractions; timers are deadlines the caller sleeps on.

pub mod bootstrap;
pub mod cache;
pub mod chat;
pub mod clock;
pub mod config;
pub mod debounce;
pub mod events;
pub mod node;
pub mod peer_id;
pub mod protocol;
pub mod store;
pub mod sync_engine;
pub mod templates;
pub mod transport;

pub use bootstrap::{BootstrapReport, restore};
pub use cache::{BlobStore, CacheError, InMemoryBlobStore, LocalCache};
pub use chat::{ChatLog, ChatMessage};
pub use clock::{Clock, ManualClock, StampSource, SystemClock, Timestamp};
pub use config::SyncConfig;
pub use debounce::{DebounceScheduler, PendingEdit};
pub use events::{EventBus, IgnoreReason, ReplicaEvent, Subscription};
pub use node::{FileNode, NodeKind};
pub use peer_id::{PeerId, PeerIdError};
pub use protocol::{DecodeError, EnvelopeKind, MAX_MESSAGE_SIZE};
pub use store::{OpenBuffer, ReplicaStore};
pub use sync_engine::{FrameKind, Inbound, Outbound, Route, SyncEngine, SyncState, TreeChange};
pub use transport::{
    EventStream, MemoryNetwork, MemoryTransport, Transport, TransportError, TransportEvent,
};
