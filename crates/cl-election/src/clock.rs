//! Time sources for lease timestamps
//!
//! Every context in a scope must read the same clock for lease ages to mean
//! anything. Production uses wall time; tests share one [`TokioClock`] so
//! that `tokio::time::advance` moves lease ages and heartbeat timers
//! together.

use std::sync::atomic::{AtomicU64, Ordering};

/// Source of "now" in milliseconds since the Unix epoch.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> u64;
}

/// Wall clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        chrono::Utc::now().timestamp_millis().max(0) as u64
    }
}

/// Clock derived from the tokio time driver.
///
/// Reports `epoch_millis` plus the tokio time elapsed since construction, so
/// it follows paused and advanced time in tests.
#[derive(Debug, Clone)]
pub struct TokioClock {
    epoch_millis: u64,
    origin: tokio::time::Instant,
}

impl TokioClock {
    /// Anchor at the current wall clock time.
    pub fn new() -> Self {
        Self::starting_at(SystemClock.now_millis())
    }

    pub fn starting_at(epoch_millis: u64) -> Self {
        Self {
            epoch_millis,
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now_millis(&self) -> u64 {
        self.epoch_millis + self.origin.elapsed().as_millis() as u64
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(now_millis: u64) -> Self {
        Self {
            now: AtomicU64::new(now_millis),
        }
    }

    pub fn set(&self, now_millis: u64) {
        self.now.store(now_millis, Ordering::SeqCst);
    }

    pub fn advance(&self, millis: u64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}
