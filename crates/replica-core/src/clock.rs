//! Wall-clock timestamps for stamping outgoing mutations.
//!
//! Every envelope carries a `sentAt` in epoch milliseconds. The engine never
//! reads the clock directly: it goes through a [`StampSource`], which makes
//! stamps strictly increasing even when the wall clock stalls or steps back.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use web_time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
pub type Timestamp = i64;

/// Source of wall-clock time.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> Timestamp;
}

/// Reads the system clock (works in WASM through `web-time`).
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> Timestamp {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as Timestamp)
            .unwrap_or(0)
    }
}

/// A clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: Arc::new(AtomicI64::new(start)),
        }
    }

    pub fn set(&self, now: Timestamp) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, millis: i64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> Timestamp {
        self.now.load(Ordering::SeqCst)
    }
}

/// Hands out strictly increasing timestamps from a [`Clock`].
#[derive(Debug)]
pub struct StampSource<C: Clock> {
    clock: C,
    last: Timestamp,
}

impl<C: Clock> StampSource<C> {
    pub fn new(clock: C) -> Self {
        Self { clock, last: 0 }
    }

    /// Next stamp: the current time, or one past the previous stamp if the
    /// clock has not moved forward since.
    pub fn next(&mut self) -> Timestamp {
        let now = self.clock.now_millis();
        self.last = now.max(self.last + 1);
        self.last
    }

    /// Current clock reading, without reserving a stamp.
    pub fn peek(&self) -> Timestamp {
        self.clock.now_millis()
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }
}
