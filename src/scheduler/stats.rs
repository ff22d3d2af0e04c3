//! Global scheduler statistics
//!
//! Lock-free counters shared across the tracker, dispatcher, pool, and
//! adaptive controller. All counters are monotonically non-decreasing for the
//! lifetime of the engine; consumers take point-in-time snapshots.

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_utils::CachePadded;

/// Engine-wide counters with lock-free atomic fields
#[derive(Debug, Default)]
pub struct EngineStats {
    /// Tasks accepted into a priority queue
    pub tasks_enqueued: CachePadded<AtomicU64>,
    /// Tasks that reached terminal Succeeded state
    pub tasks_succeeded: CachePadded<AtomicU64>,
    /// Tasks that reached terminal Failed state (retries exhausted)
    pub tasks_failed: CachePadded<AtomicU64>,
    /// Tasks dropped by backpressure (queue full or re-queue cap hit)
    pub tasks_dropped: CachePadded<AtomicU64>,
    /// Behavior events dropped at the tracker intake
    pub events_dropped: CachePadded<AtomicU64>,
    /// Behavior events applied to sessions
    pub events_processed: CachePadded<AtomicU64>,
    /// Total task processing time across all workers, nanoseconds
    pub total_processing_ns: CachePadded<AtomicU64>,
}

impl EngineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_enqueued(&self) {
        self.tasks_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_succeeded(&self, processing_ns: u64) {
        self.tasks_succeeded.fetch_add(1, Ordering::Relaxed);
        self.total_processing_ns
            .fetch_add(processing_ns, Ordering::Relaxed);
    }

    pub fn record_failed(&self, processing_ns: u64) {
        self.tasks_failed.fetch_add(1, Ordering::Relaxed);
        self.total_processing_ns
            .fetch_add(processing_ns, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.tasks_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_event_dropped(&self) {
        self.events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_event_processed(&self) {
        self.events_processed.fetch_add(1, Ordering::Relaxed);
    }

    /// Atomic snapshot of all counters
    pub fn snapshot(&self) -> EngineStatsSnapshot {
        let succeeded = self.tasks_succeeded.load(Ordering::Relaxed);
        let failed = self.tasks_failed.load(Ordering::Relaxed);
        let total_ns = self.total_processing_ns.load(Ordering::Relaxed);
        let completed = succeeded + failed;

        EngineStatsSnapshot {
            tasks_enqueued: self.tasks_enqueued.load(Ordering::Relaxed),
            tasks_succeeded: succeeded,
            tasks_failed: failed,
            tasks_dropped: self.tasks_dropped.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            events_processed: self.events_processed.load(Ordering::Relaxed),
            avg_processing_ns: if completed > 0 { total_ns / completed } else { 0 },
        }
    }
}

/// Snapshot for reading stats without holding references to the atomics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStatsSnapshot {
    pub tasks_enqueued: u64,
    pub tasks_succeeded: u64,
    pub tasks_failed: u64,
    pub tasks_dropped: u64,
    pub events_dropped: u64,
    pub events_processed: u64,
    pub avg_processing_ns: u64,
}

impl EngineStatsSnapshot {
    /// Fraction of completed tasks that succeeded
    pub fn success_rate(&self) -> f64 {
        let completed = self.tasks_succeeded + self.tasks_failed;
        if completed > 0 {
            self.tasks_succeeded as f64 / completed as f64
        } else {
            0.0
        }
    }
}
