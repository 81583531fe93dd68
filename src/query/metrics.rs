use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic per-query probe and scan counters.
///
/// The counters are diagnostic only: they never influence a query's result
/// set. Both engines reset them on entry; callers read them after the query
/// returns. Increments are atomic so concurrent scan workers and traversal
/// can share one instance, but no ordering between the counters is implied.
#[derive(Debug, Default)]
pub struct QueryMetrics {
    filter_probes: AtomicU64,
    leaf_probes: AtomicU64,
    file_scans: AtomicU64,
}

impl QueryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Zeroes all counters. Called by the query engines at entry.
    pub fn reset(&self) {
        self.filter_probes.store(0, Ordering::Relaxed);
        self.leaf_probes.store(0, Ordering::Relaxed);
        self.file_scans.store(0, Ordering::Relaxed);
    }

    /// Counts one filter consultation; `leaf` marks probes against leaf nodes.
    pub fn record_probe(&self, leaf: bool) {
        self.filter_probes.fetch_add(1, Ordering::Relaxed);
        if leaf {
            self.leaf_probes.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Counts `count` dispatched file scans.
    pub fn record_file_scans(&self, count: u64) {
        self.file_scans.fetch_add(count, Ordering::Relaxed);
    }

    /// Total filter consultations.
    pub fn filter_probes(&self) -> u64 {
        self.filter_probes.load(Ordering::Relaxed)
    }

    /// Filter consultations against leaf nodes (a subset of
    /// [`filter_probes`](Self::filter_probes)).
    pub fn leaf_probes(&self) -> u64 {
        self.leaf_probes.load(Ordering::Relaxed)
    }

    /// File scans dispatched to the storage adapter.
    pub fn file_scans(&self) -> u64 {
        self.file_scans.load(Ordering::Relaxed)
    }
}
