//! Debounce scheduler for outgoing content edits.
//!
//! Keeps at most one pending edit per buffer path. A new edit for the same
//! path replaces the pending content and restarts its window, so a burst of
//! typing turns into a single `content_changed` once input goes quiet.
//!
//! The scheduler owns no timer. Callers pass `now` in and sleep until
//! [`DebounceScheduler::next_deadline`].

use crate::node::is_within;
use std::collections::HashMap;
use std::time::Duration;
use web_time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEdit {
    pub path: String,
    pub content: String,
}

#[derive(Debug)]
struct Slot {
    content: String,
    deadline: Instant,
}

#[derive(Debug)]
pub struct DebounceScheduler {
    window: Duration,
    pending: HashMap<String, Slot>,
}

impl DebounceScheduler {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: HashMap::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn is_pending(&self, path: &str) -> bool {
        self.pending.contains_key(path)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Record an edit, superseding any pending edit for the same path.
    pub fn schedule(&mut self, path: &str, content: impl Into<String>, now: Instant) {
        self.pending.insert(
            path.to_string(),
            Slot {
                content: content.into(),
                deadline: now + self.window,
            },
        );
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|slot| slot.deadline).min()
    }

    /// Remove and return every edit whose window has elapsed, earliest first.
    pub fn take_due(&mut self, now: Instant) -> Vec<PendingEdit> {
        let mut due: Vec<(Instant, String)> = self
            .pending
            .iter()
            .filter(|(_, slot)| slot.deadline <= now)
            .map(|(path, slot)| (slot.deadline, path.clone()))
            .collect();
        due.sort();

        due.into_iter()
            .filter_map(|(_, path)| self.flush(&path))
            .collect()
    }

    /// Take the pending edit for `path` now, regardless of its deadline.
    pub fn flush(&mut self, path: &str) -> Option<PendingEdit> {
        self.pending.remove_entry(path).map(|(path, slot)| PendingEdit {
            path,
            content: slot.content,
        })
    }

    /// Take every pending edit, earliest deadline first.
    pub fn flush_all(&mut self) -> Vec<PendingEdit> {
        let latest = self.pending.values().map(|slot| slot.deadline).max();
        latest.map(|at| self.take_due(at)).unwrap_or_default()
    }

    /// Drop pending edits at or under `path`.
    pub fn cancel(&mut self, path: &str) -> usize {
        let before = self.pending.len();
        self.pending.retain(|pending, _| !is_within(pending, path));
        before - self.pending.len()
    }

    /// Drop every pending edit. Returns how many there were.
    pub fn clear(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }

    /// Follow a rename of `old_path` (or an ancestor directory) to `new_path`.
    pub fn rename(&mut self, old_path: &str, new_path: &str) {
        let moved: Vec<String> = self
            .pending
            .keys()
            .filter(|p| is_within(p, old_path))
            .cloned()
            .collect();
        for path in moved {
            if let Some(slot) = self.pending.remove(&path) {
                let renamed = format!("{}{}", new_path, &path[old_path.len()..]);
                self.pending.insert(renamed, slot);
            }
        }
    }
}
