//! Channel processor metrics
//!
//! Atomic counters for tracking fan-out into queues.
//! All operations use relaxed ordering.

use std::sync::atomic::{AtomicU64, Ordering};

/// Metrics for a channel processor
///
/// These counters are eventually consistent, not real-time.
#[derive(Debug, Default)]
pub struct ProcessorMetrics {
    /// Batches handed to the processor
    batches_received: AtomicU64,

    /// Events handed to the processor
    events_received: AtomicU64,

    /// Batches committed to every required queue
    batches_committed: AtomicU64,

    /// Batches refused by a required queue
    batches_rejected: AtomicU64,

    /// Optional queue puts that failed and were rolled back
    optional_failures: AtomicU64,
}

impl ProcessorMetrics {
    #[inline]
    pub const fn new() -> Self {
        Self {
            batches_received: AtomicU64::new(0),
            events_received: AtomicU64::new(0),
            batches_committed: AtomicU64::new(0),
            batches_rejected: AtomicU64::new(0),
            optional_failures: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn record_received(&self, event_count: u64) {
        self.batches_received.fetch_add(1, Ordering::Relaxed);
        self.events_received
            .fetch_add(event_count, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_committed(&self) {
        self.batches_committed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_rejected(&self) {
        self.batches_rejected.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_optional_failure(&self) {
        self.optional_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a point-in-time copy of all counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            batches_received: self.batches_received.load(Ordering::Relaxed),
            events_received: self.events_received.load(Ordering::Relaxed),
            batches_committed: self.batches_committed.load(Ordering::Relaxed),
            batches_rejected: self.batches_rejected.load(Ordering::Relaxed),
            optional_failures: self.optional_failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time snapshot of processor metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub batches_received: u64,
    pub events_received: u64,
    pub batches_committed: u64,
    pub batches_rejected: u64,
    pub optional_failures: u64,
}
