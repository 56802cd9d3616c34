//! Session bootstrap: load the cached replica before live sync starts.

use crate::cache::{BlobStore, CacheError, LocalCache};
use crate::clock::Clock;
use crate::sync_engine::SyncEngine;
use tracing::{info, warn};

/// What [`restore`] found in the cache.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BootstrapReport {
    /// Top-level nodes restored.
    pub nodes: usize,
    pub messages: usize,
    /// Blobs that could not be used and were treated as empty.
    pub discarded: Vec<String>,
}

fn discard(report: &mut BootstrapReport, what: &str, err: CacheError) {
    warn!("Ignoring cached {}: {}", what, err);
    report.discarded.push(what.to_string());
}

/// Replace the engine's tree and chat with whatever the cache holds.
///
/// A missing, unreadable or corrupt blob leaves that part empty. This never
/// fails.
pub async fn restore<S: BlobStore, C: Clock>(
    cache: &LocalCache<S>,
    engine: &mut SyncEngine<C>,
) -> BootstrapReport {
    let mut report = BootstrapReport::default();

    let tree = match cache.load_tree().await {
        Ok(tree) => tree.unwrap_or_default(),
        Err(e) => {
            discard(&mut report, "file tree", e);
            Vec::new()
        }
    };
    report.nodes = engine.restore_tree(tree);

    let messages = match cache.load_chat().await {
        Ok(messages) => messages.unwrap_or_default(),
        Err(e) => {
            discard(&mut report, "chat messages", e);
            Vec::new()
        }
    };
    engine.restore_chat(messages);
    report.messages = engine.chat().len();

    info!(
        "Restored {} top-level nodes and {} chat messages from cache",
        report.nodes, report.messages
    );
    report
}
