//! Peer session actor.
//!
//! One task owns the sync engine, the debounce scheduler, the local cache
//! and the transport. Everything that touches replica state is serialized
//! through its loop:
//!
//! - local commands arrive from [`SessionHandle`]s
//! - transport events arrive from the mesh
//! - the earliest debounce deadline fires pending content broadcasts
//!
//! After each input the changed parts of the replica are written back to
//! the cache.

use futures::StreamExt;
use replica_core::node::{join_path, parent_path};
use replica_core::{
    BlobStore, BootstrapReport, ChatMessage, Clock, DebounceScheduler, EventBus, EventStream,
    FileNode, Inbound, LocalCache, OpenBuffer, Outbound, PeerId, Route, Subscription, SyncConfig,
    SyncEngine, SyncState, Transport, TransportEvent, TreeChange,
};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, sleep, sleep_until};
use tracing::{debug, info, warn};

const COMMAND_BUFFER: usize = 64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("session has shut down")]
    Closed,
}

pub type Result<T> = std::result::Result<T, SessionError>;

/// Read-only copy of a session's state.
#[derive(Debug, Clone)]
pub struct SessionView {
    pub peer_id: PeerId,
    pub author: String,
    pub state: SyncState,
    pub tree: Vec<FileNode>,
    pub buffers: Vec<OpenBuffer>,
    pub active_buffer: Option<usize>,
    pub chat: Vec<ChatMessage>,
    /// Edits waiting out the debounce window
    pub pending_edits: usize,
}

impl SessionView {
    pub fn find(&self, path: &str) -> Option<&FileNode> {
        self.tree
            .iter()
            .flat_map(|node| node.walk())
            .find(|node| node.path == path)
    }

    pub fn content(&self, path: &str) -> Option<&str> {
        self.find(path).and_then(|node| node.content.as_deref())
    }
}

#[derive(Debug)]
enum Command {
    Create {
        node: FileNode,
        reply: oneshot::Sender<bool>,
    },
    Delete {
        path: String,
        reply: oneshot::Sender<bool>,
    },
    Rename {
        path: String,
        new_name: String,
        reply: oneshot::Sender<bool>,
    },
    Open {
        path: String,
        reply: oneshot::Sender<Option<usize>>,
    },
    Edit {
        path: String,
        content: String,
        reply: oneshot::Sender<bool>,
    },
    Save {
        path: String,
        reply: oneshot::Sender<bool>,
    },
    Close {
        path: String,
        reply: oneshot::Sender<bool>,
    },
    Activate {
        path: String,
        reply: oneshot::Sender<bool>,
    },
    SendChat {
        body: String,
        reply: oneshot::Sender<bool>,
    },
    View {
        reply: oneshot::Sender<SessionView>,
    },
    /// Posted by the snapshot timer once a joined peer has waited out the
    /// snapshot delay
    SendSnapshot(PeerId),
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Cheap, cloneable front end to a running session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
}

impl SessionHandle {
    async fn request<R>(&self, make: impl FnOnce(oneshot::Sender<R>) -> Command) -> Result<R> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(make(reply))
            .await
            .map_err(|_| SessionError::Closed)?;
        response.await.map_err(|_| SessionError::Closed)
    }

    /// Create an empty file, along with any missing parent directories.
    pub async fn create_file(&self, path: &str) -> Result<bool> {
        let node = FileNode::file(path, "");
        self.request(|reply| Command::Create { node, reply }).await
    }

    /// Insert a prepared node, such as a file read from local disk, and
    /// announce it.
    pub async fn create_node(&self, node: FileNode) -> Result<bool> {
        self.request(|reply| Command::Create { node, reply }).await
    }

    pub async fn create_directory(&self, path: &str) -> Result<bool> {
        let node = FileNode::directory(path);
        self.request(|reply| Command::Create { node, reply }).await
    }

    pub async fn delete(&self, path: &str) -> Result<bool> {
        let path = path.to_string();
        self.request(|reply| Command::Delete { path, reply }).await
    }

    pub async fn rename(&self, path: &str, new_name: &str) -> Result<bool> {
        let (path, new_name) = (path.to_string(), new_name.to_string());
        self.request(|reply| Command::Rename {
            path,
            new_name,
            reply,
        })
        .await
    }

    /// Open a buffer for a file and make it active. Returns its index.
    pub async fn open(&self, path: &str) -> Result<Option<usize>> {
        let path = path.to_string();
        self.request(|reply| Command::Open { path, reply }).await
    }

    /// Replace a file's content. The change is broadcast once the path has
    /// been quiet for the debounce window.
    pub async fn edit(&self, path: &str, content: &str) -> Result<bool> {
        let (path, content) = (path.to_string(), content.to_string());
        self.request(|reply| Command::Edit {
            path,
            content,
            reply,
        })
        .await
    }

    pub async fn save(&self, path: &str) -> Result<bool> {
        let path = path.to_string();
        self.request(|reply| Command::Save { path, reply }).await
    }

    /// Close a buffer, sending any edit still waiting on the debounce.
    pub async fn close(&self, path: &str) -> Result<bool> {
        let path = path.to_string();
        self.request(|reply| Command::Close { path, reply }).await
    }

    pub async fn activate(&self, path: &str) -> Result<bool> {
        let path = path.to_string();
        self.request(|reply| Command::Activate { path, reply }).await
    }

    pub async fn send_chat(&self, body: &str) -> Result<bool> {
        let body = body.to_string();
        self.request(|reply| Command::SendChat { body, reply }).await
    }

    pub async fn view(&self) -> Result<SessionView> {
        self.request(|reply| Command::View { reply }).await
    }

    /// Flush pending edits, persist, and stop the actor.
    pub async fn shutdown(&self) -> Result<()> {
        self.request(|reply| Command::Shutdown { reply }).await
    }
}

/// Log every replica event at debug level until the subscription drops.
pub fn trace_events(bus: &Arc<EventBus>) -> Subscription {
    bus.subscribe(|event| debug!(target: "replica_events", "{:?}", event))
}

/// Restore the replica from `cache`, then run the session on its own task.
pub async fn spawn<T, S, C>(
    mut engine: SyncEngine<C>,
    cache: LocalCache<S>,
    transport: T,
    events: EventStream,
    config: SyncConfig,
) -> (SessionHandle, BootstrapReport)
where
    T: Transport + 'static,
    S: BlobStore + 'static,
    C: Clock + 'static,
{
    let report = replica_core::restore(&cache, &mut engine).await;
    let (tx, rx) = mpsc::channel(COMMAND_BUFFER);

    let session = Session {
        persisted_tree: engine.store().revision(),
        persisted_chat: engine.chat().revision(),
        debounce: DebounceScheduler::new(config.debounce_window),
        engine,
        cache,
        transport,
        events,
        transport_open: true,
        commands: rx,
        loopback: tx.downgrade(),
        config,
    };
    tokio::spawn(session.run());

    (SessionHandle { commands: tx }, report)
}

struct Session<T, S: BlobStore, C: Clock> {
    engine: SyncEngine<C>,
    debounce: DebounceScheduler,
    cache: LocalCache<S>,
    transport: T,
    events: EventStream,
    transport_open: bool,
    commands: mpsc::Receiver<Command>,
    /// Lets timers post back without keeping the actor alive
    loopback: mpsc::WeakSender<Command>,
    config: SyncConfig,
    persisted_tree: u64,
    persisted_chat: u64,
}

/// Debounce deadlines are read against tokio's clock so paused-time tests
/// drive them.
fn now() -> std::time::Instant {
    Instant::now().into_std()
}

async fn sleep_until_deadline(deadline: Option<std::time::Instant>) {
    match deadline {
        Some(deadline) => sleep_until(Instant::from_std(deadline)).await,
        None => std::future::pending().await,
    }
}

impl<T, S, C> Session<T, S, C>
where
    T: Transport,
    S: BlobStore,
    C: Clock,
{
    async fn run(mut self) {
        info!("Session started for {}", self.engine.local_id());

        loop {
            let deadline = self.debounce.next_deadline();

            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown { reply }) => {
                        self.flush_all().await;
                        self.persist().await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.on_command(command).await,
                    None => {
                        debug!("All session handles dropped");
                        self.flush_all().await;
                        self.persist().await;
                        break;
                    }
                },

                event = self.events.next(), if self.transport_open => match event {
                    Some(event) => self.on_transport_event(event).await,
                    None => {
                        warn!("Transport event stream ended");
                        self.transport_open = false;
                    }
                },

                _ = sleep_until_deadline(deadline) => self.flush_due().await,
            }

            self.persist().await;
        }

        info!("Session stopped for {}", self.engine.local_id());
    }

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::Create { node, reply } => {
                let sent = self.engine.create_node(node);
                let _ = reply.send(self.dispatch_opt(sent).await);
            }
            Command::Delete { path, reply } => {
                let sent = self.engine.delete_node(&path);
                if sent.is_some() {
                    let cancelled = self.debounce.cancel(&path);
                    if cancelled > 0 {
                        debug!("Dropped {} pending edit(s) under {}", cancelled, path);
                    }
                }
                let _ = reply.send(self.dispatch_opt(sent).await);
            }
            Command::Rename {
                path,
                new_name,
                reply,
            } => {
                let sent = self.engine.rename_node(&path, &new_name);
                if sent.is_some() {
                    let new_path = join_path(parent_path(&path), &new_name);
                    self.debounce.rename(&path, &new_path);
                }
                let _ = reply.send(self.dispatch_opt(sent).await);
            }
            Command::Open { path, reply } => {
                let _ = reply.send(self.engine.store_mut().open_buffer(&path));
            }
            Command::Edit {
                path,
                content,
                reply,
            } => {
                let changed = self.engine.edit_content(&path, &content);
                if changed {
                    self.debounce.schedule(&path, content, now());
                }
                let _ = reply.send(changed);
            }
            Command::Save { path, reply } => {
                let saved = match self.engine.store().buffer_index(&path) {
                    Some(index) => self.engine.save_buffer(index),
                    None => false,
                };
                let _ = reply.send(saved);
            }
            Command::Close { path, reply } => {
                let Some(index) = self.engine.store().buffer_index(&path) else {
                    let _ = reply.send(false);
                    return;
                };
                if let Some(edit) = self.debounce.flush(&path) {
                    let sent = self.engine.publish_content(&edit.path, &edit.content);
                    self.dispatch_opt(sent).await;
                }
                let closed = self.engine.store_mut().close_buffer(index).is_some();
                let _ = reply.send(closed);
            }
            Command::Activate { path, reply } => {
                let activated = match self.engine.store().buffer_index(&path) {
                    Some(index) => self.engine.store_mut().set_active_buffer(index),
                    None => false,
                };
                let _ = reply.send(activated);
            }
            Command::SendChat { body, reply } => {
                let sent = self.engine.send_chat(&body);
                let _ = reply.send(self.dispatch_opt(sent).await);
            }
            Command::View { reply } => {
                let _ = reply.send(self.view());
            }
            Command::SendSnapshot(peer) => {
                info!("Sending tree snapshot to {}", peer);
                let sent = self.engine.snapshot_for(&peer);
                self.dispatch_opt(sent).await;
            }
            // Handled by the run loop
            Command::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }

    async fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Message { from, data } => {
                let outcome = self.engine.handle_incoming(&data);
                debug!("Frame from {} ({} bytes): {:?}", from, data.len(), outcome);
                if let Inbound::Applied(change) = outcome {
                    self.follow_remote_change(&change);
                }
            }
            TransportEvent::PeerJoined(peer) => {
                info!(
                    "Peer joined: {}, sending snapshot in {:?}",
                    peer, self.config.snapshot_delay
                );
                let loopback = self.loopback.clone();
                let delay = self.config.snapshot_delay;
                tokio::spawn(async move {
                    sleep(delay).await;
                    if let Some(commands) = loopback.upgrade() {
                        let _ = commands.send(Command::SendSnapshot(peer)).await;
                    }
                });
            }
            TransportEvent::PeerLeft(peer) => {
                info!("Peer left: {}", peer);
            }
        }
    }

    /// Re-key or drop pending edits after a peer changed the tree under them.
    fn follow_remote_change(&mut self, change: &TreeChange) {
        match change {
            TreeChange::Renamed { old_path, new_path } => {
                self.debounce.rename(old_path, new_path);
            }
            TreeChange::Deleted { path } => {
                let cancelled = self.debounce.cancel(path);
                if cancelled > 0 {
                    debug!("Peer deleted {}, dropped {} pending edit(s)", path, cancelled);
                }
            }
            // The snapshot also closed every buffer the edits came from
            TreeChange::Replaced => {
                let dropped = self.debounce.clear();
                if dropped > 0 {
                    debug!("Snapshot replaced the tree, dropped {} pending edit(s)", dropped);
                }
            }
            TreeChange::Content { .. } | TreeChange::Created { .. } => {}
        }
    }

    async fn flush_due(&mut self) {
        for edit in self.debounce.take_due(now()) {
            let sent = self.engine.publish_content(&edit.path, &edit.content);
            self.dispatch_opt(sent).await;
        }
    }

    async fn flush_all(&mut self) {
        let edits = self.debounce.flush_all();
        if !edits.is_empty() {
            debug!("Flushing {} pending edit(s)", edits.len());
        }
        for edit in edits {
            let sent = self.engine.publish_content(&edit.path, &edit.content);
            self.dispatch_opt(sent).await;
        }
    }

    /// Hand a frame to the transport. Returns whether there was one.
    async fn dispatch_opt(&self, outbound: Option<Outbound>) -> bool {
        let Some(outbound) = outbound else {
            return false;
        };
        let result = match &outbound.route {
            Route::Broadcast => self.transport.broadcast(&outbound.data).await,
            Route::Peer(peer) => self.transport.send_to(peer, &outbound.data).await,
        };
        if let Err(e) = result {
            warn!("Failed to send {:?}: {}", outbound.kind, e);
        }
        true
    }

    async fn persist(&mut self) {
        let tree_revision = self.engine.store().revision();
        if tree_revision != self.persisted_tree {
            match self.cache.save_tree(self.engine.store().tree()).await {
                Ok(()) => self.persisted_tree = tree_revision,
                Err(e) => warn!("Failed to persist file tree: {}", e),
            }
        }

        let chat_revision = self.engine.chat().revision();
        if chat_revision != self.persisted_chat {
            match self.cache.save_chat(self.engine.chat().messages()).await {
                Ok(()) => self.persisted_chat = chat_revision,
                Err(e) => warn!("Failed to persist chat: {}", e),
            }
        }
    }

    fn view(&self) -> SessionView {
        let store = self.engine.store();
        SessionView {
            peer_id: self.engine.local_id().clone(),
            author: self.engine.author().to_string(),
            state: self.engine.state(),
            tree: store.tree().to_vec(),
            buffers: store.buffers().to_vec(),
            active_buffer: store.active_index(),
            chat: self.engine.chat().messages().to_vec(),
            pending_edits: self.debounce.pending_count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replica_core::{InMemoryBlobStore, ManualClock, MemoryNetwork, SystemClock};
    use std::time::Duration;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    async fn start_peer(network: &MemoryNetwork, id: &str, store: InMemoryBlobStore) -> SessionHandle {
        start_peer_with_clock(network, id, store, SystemClock).await
    }

    async fn start_peer_with_clock<C: Clock + 'static>(
        network: &MemoryNetwork,
        id: &str,
        store: InMemoryBlobStore,
        clock: C,
    ) -> SessionHandle {
        let peer: PeerId = id.parse().unwrap();
        let (transport, events) = network.join(peer.clone());
        let engine = SyncEngine::new(peer, id, clock);
        let (handle, _) = spawn(
            engine,
            LocalCache::new(store),
            transport,
            events,
            SyncConfig::default(),
        )
        .await;
        handle
    }

    async fn pair() -> (SessionHandle, SessionHandle) {
        let network = MemoryNetwork::new();
        let a = start_peer(&network, "alice", InMemoryBlobStore::new()).await;
        let b = start_peer(&network, "bob", InMemoryBlobStore::new()).await;
        (a, b)
    }

    // ==================== Debounced content ====================

    #[tokio::test(start_paused = true)]
    async fn test_edits_broadcast_once_quiet() {
        let (a, b) = pair().await;
        assert!(a.create_file("notes.md").await.unwrap());
        tokio::time::sleep(ms(10)).await;
        assert_eq!(b.view().await.unwrap().content("notes.md"), Some(""));

        a.edit("notes.md", "h").await.unwrap();
        tokio::time::sleep(ms(200)).await;
        a.edit("notes.md", "hello").await.unwrap();
        tokio::time::sleep(ms(200)).await;

        assert_eq!(a.view().await.unwrap().pending_edits, 1);
        assert_eq!(b.view().await.unwrap().content("notes.md"), Some(""));

        tokio::time::sleep(ms(400)).await;
        assert_eq!(a.view().await.unwrap().pending_edits, 0);
        assert_eq!(b.view().await.unwrap().content("notes.md"), Some("hello"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_sends_pending_edit_immediately() {
        let (a, b) = pair().await;
        a.create_file("main.rs").await.unwrap();
        assert_eq!(a.open("main.rs").await.unwrap(), Some(0));
        a.edit("main.rs", "fn main() {}").await.unwrap();

        assert!(a.close("main.rs").await.unwrap());
        tokio::time::sleep(ms(10)).await;

        let view = b.view().await.unwrap();
        assert_eq!(view.content("main.rs"), Some("fn main() {}"));
        let view = a.view().await.unwrap();
        assert!(view.buffers.is_empty());
        assert_eq!(view.pending_edits, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_cancels_pending_edit() {
        let (a, b) = pair().await;
        a.create_file("docs/todo.md").await.unwrap();
        a.edit("docs/todo.md", "draft").await.unwrap();
        assert!(a.delete("docs").await.unwrap());

        tokio::time::sleep(ms(600)).await;
        assert_eq!(a.view().await.unwrap().pending_edits, 0);
        let view = b.view().await.unwrap();
        assert!(view.find("docs").is_none());
        assert!(view.find("docs/todo.md").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_edit_follows_rename() {
        let (a, b) = pair().await;
        a.create_file("src/old.rs").await.unwrap();
        a.edit("src/old.rs", "// moved").await.unwrap();
        assert!(a.rename("src/old.rs", "new.rs").await.unwrap());

        tokio::time::sleep(ms(600)).await;
        let view = b.view().await.unwrap();
        assert!(view.find("src/old.rs").is_none());
        assert_eq!(view.content("src/new.rs"), Some("// moved"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_edit_follows_remote_rename() {
        let network = MemoryNetwork::new();
        let clock = ManualClock::new(1_000);
        let a = start_peer_with_clock(&network, "alice", InMemoryBlobStore::new(), clock.clone()).await;
        let b = start_peer_with_clock(&network, "bob", InMemoryBlobStore::new(), clock.clone()).await;

        a.create_file("src/old.rs").await.unwrap();
        a.edit("src/old.rs", "typed by alice").await.unwrap();
        tokio::time::sleep(ms(100)).await;

        clock.advance(100);
        assert!(b.rename("src/old.rs", "new.rs").await.unwrap());
        tokio::time::sleep(ms(10)).await;
        clock.advance(100);

        tokio::time::sleep(ms(1_000)).await;
        for peer in [&a, &b] {
            let view = peer.view().await.unwrap();
            assert!(view.find("src/old.rs").is_none());
            assert_eq!(view.content("src/new.rs"), Some("typed by alice"));
            assert_eq!(view.pending_edits, 0);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_delete_cancels_pending_edit() {
        let network = MemoryNetwork::new();
        let clock = ManualClock::new(1_000);
        let a = start_peer_with_clock(&network, "alice", InMemoryBlobStore::new(), clock.clone()).await;
        let b = start_peer_with_clock(&network, "bob", InMemoryBlobStore::new(), clock.clone()).await;

        a.create_file("docs/todo.md").await.unwrap();
        a.edit("docs/todo.md", "draft").await.unwrap();
        tokio::time::sleep(ms(100)).await;

        clock.advance(100);
        assert!(b.delete("docs").await.unwrap());
        tokio::time::sleep(ms(10)).await;
        assert_eq!(a.view().await.unwrap().pending_edits, 0);

        tokio::time::sleep(ms(1_000)).await;
        for peer in [&a, &b] {
            let view = peer.view().await.unwrap();
            assert!(view.tree.is_empty());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_drops_pending_edits() {
        let network = MemoryNetwork::new();
        let a = start_peer(&network, "alice", InMemoryBlobStore::new()).await;
        a.create_file("shared.md").await.unwrap();

        let cached = InMemoryBlobStore::new();
        LocalCache::new(cached.clone())
            .save_tree(&[FileNode::file("shared.md", ""), FileNode::file("scratch.md", "")])
            .await
            .unwrap();
        let b = start_peer(&network, "bob", cached).await;

        // The snapshot lands at 1000 ms, before these edits settle
        tokio::time::sleep(ms(700)).await;
        assert!(b.edit("shared.md", "offline draft").await.unwrap());
        assert!(b.edit("scratch.md", "offline only").await.unwrap());
        assert_eq!(b.view().await.unwrap().pending_edits, 2);

        tokio::time::sleep(ms(400)).await;
        let view = b.view().await.unwrap();
        assert_eq!(view.state, SyncState::Live);
        assert_eq!(view.pending_edits, 0);
        assert!(view.find("scratch.md").is_none());

        tokio::time::sleep(ms(600)).await;
        assert_eq!(a.view().await.unwrap().content("shared.md"), Some(""));
        assert_eq!(b.view().await.unwrap().content("shared.md"), Some(""));
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_node_carries_content() {
        let (a, b) = pair().await;
        let mut node = FileNode::file("import/data.csv", "a,b\n1,2\n");
        node.last_modified = Some(1_700_000_000_000);
        assert!(a.create_node(node).await.unwrap());
        assert_eq!(a.open("import/data.csv").await.unwrap(), Some(0));
        tokio::time::sleep(ms(10)).await;

        let view = b.view().await.unwrap();
        assert_eq!(view.content("import/data.csv"), Some("a,b\n1,2\n"));
        assert!(view.find("import").is_some_and(FileNode::is_dir));
    }

    // ==================== Late joiner ====================

    #[tokio::test(start_paused = true)]
    async fn test_late_joiner_gets_snapshot_after_delay() {
        let network = MemoryNetwork::new();
        let a = start_peer(&network, "alice", InMemoryBlobStore::new()).await;
        a.create_file("README.md").await.unwrap();
        a.create_directory("src").await.unwrap();

        let b = start_peer(&network, "bob", InMemoryBlobStore::new()).await;
        tokio::time::sleep(ms(500)).await;
        let view = b.view().await.unwrap();
        assert!(view.tree.is_empty());
        assert_eq!(view.state, SyncState::Bootstrapping);

        tokio::time::sleep(ms(600)).await;
        let view = b.view().await.unwrap();
        assert_eq!(view.state, SyncState::Live);
        assert!(view.find("README.md").is_some());
        assert!(view.find("src").is_some());
        // The host never receives a snapshot of its own
        assert_eq!(a.view().await.unwrap().state, SyncState::Bootstrapping);
    }

    // ==================== Chat ====================

    #[tokio::test(start_paused = true)]
    async fn test_chat_reaches_peer() {
        let (a, b) = pair().await;
        assert!(a.send_chat("  hi bob  ").await.unwrap());
        assert!(!a.send_chat("   ").await.unwrap());
        tokio::time::sleep(ms(10)).await;

        let chat = b.view().await.unwrap().chat;
        assert_eq!(chat.len(), 1);
        assert_eq!(chat[0].body, "hi bob");
        assert_eq!(chat[0].author, "alice");
        assert!(!chat[0].origin_is_local);
    }

    // ==================== Buffers ====================

    #[tokio::test(start_paused = true)]
    async fn test_buffer_commands() {
        let (a, _b) = pair().await;
        a.create_file("a.rs").await.unwrap();
        a.create_file("b.rs").await.unwrap();
        assert_eq!(a.open("a.rs").await.unwrap(), Some(0));
        assert_eq!(a.open("b.rs").await.unwrap(), Some(1));
        assert_eq!(a.open("missing.rs").await.unwrap(), None);

        assert!(a.activate("a.rs").await.unwrap());
        assert!(!a.activate("missing.rs").await.unwrap());
        assert_eq!(a.view().await.unwrap().active_buffer, Some(0));

        a.edit("a.rs", "let x = 1;").await.unwrap();
        assert!(a.save("a.rs").await.unwrap());
        let view = a.view().await.unwrap();
        assert!(!view.buffers[0].dirty);
        assert_eq!(view.content("a.rs"), Some("let x = 1;"));
        assert!(!a.save("missing.rs").await.unwrap());
        assert!(!a.close("missing.rs").await.unwrap());
    }

    // ==================== Events ====================

    #[test]
    fn test_trace_events_subscription() {
        let engine = SyncEngine::new("alice".parse().unwrap(), "alice", SystemClock);
        let subscription = trace_events(engine.events());
        assert_eq!(engine.events().subscriber_count(), 1);
        drop(subscription);
        assert_eq!(engine.events().subscriber_count(), 0);
    }

    // ==================== Persistence ====================

    #[tokio::test(start_paused = true)]
    async fn test_state_survives_restart() {
        let store = InMemoryBlobStore::new();
        let network = MemoryNetwork::new();
        let a = start_peer(&network, "alice", store.clone()).await;
        a.create_file("keep.md").await.unwrap();
        a.send_chat("remember me").await.unwrap();
        a.shutdown().await.unwrap();
        assert!(store.get("fileTree").is_some());
        assert!(store.get("chatMessages").is_some());

        let network = MemoryNetwork::new();
        let a = start_peer(&network, "alice", store).await;
        let view = a.view().await.unwrap();
        assert!(view.find("keep.md").is_some());
        assert_eq!(view.chat.len(), 1);
        assert!(view.chat[0].origin_is_local);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_flushes_and_stops() {
        let (a, b) = pair().await;
        a.create_file("late.md").await.unwrap();
        a.edit("late.md", "last words").await.unwrap();
        a.shutdown().await.unwrap();
        tokio::time::sleep(ms(10)).await;

        assert_eq!(b.view().await.unwrap().content("late.md"), Some("last words"));
        assert_eq!(a.view().await.unwrap_err(), SessionError::Closed);
    }
}
