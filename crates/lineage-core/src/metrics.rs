//! Process-wide counters for lineage activity.
//!
//! Counters are bumped silently at the call site. [`Metrics::flush`] emits
//! the current values as one `tracing::info!` event.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    reads: AtomicU64,
    writes: AtomicU64,
    commits: AtomicU64,
    replays: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            commits: AtomicU64::new(0),
            replays: AtomicU64::new(0),
        }
    }

    pub fn inc_reads(&self) {
        self.reads.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "reads", "counter incremented");
    }

    pub fn inc_writes(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "writes", "counter incremented");
    }

    pub fn inc_commits(&self) {
        self.commits.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "commits", "counter incremented");
    }

    /// Audit-mode reads of historical actions.
    pub fn inc_replays(&self) {
        self.replays.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "replays", "counter incremented");
    }

    /// Emit all counters as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            reads = self.reads(),
            writes = self.writes(),
            commits = self.commits(),
            replays = self.replays(),
        );
    }

    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    pub fn commits(&self) -> u64 {
        self.commits.load(Ordering::Relaxed)
    }

    pub fn replays(&self) -> u64 {
        self.replays.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.reads.store(0, Ordering::Relaxed);
        self.writes.store(0, Ordering::Relaxed);
        self.commits.store(0, Ordering::Relaxed);
        self.replays.store(0, Ordering::Relaxed);
    }
}
