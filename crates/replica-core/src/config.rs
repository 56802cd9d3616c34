//! Replication tunables.

use std::time::Duration;

pub const DEFAULT_DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);
pub const DEFAULT_SNAPSHOT_DELAY: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncConfig {
    /// Quiet period after the last keystroke before content is broadcast.
    pub debounce_window: Duration,
    /// Wait between a peer joining and sending it the tree snapshot.
    pub snapshot_delay: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce_window: DEFAULT_DEBOUNCE_WINDOW,
            snapshot_delay: DEFAULT_SNAPSHOT_DELAY,
        }
    }
}
