//! Common types for sources
//!
//! Errors and counters shared by source transports.

use std::sync::atomic::{AtomicU64, Ordering};

use conduit_pipeline::LifecycleError;

/// Source errors
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// Failed to bind to address
    #[error("failed to bind to {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// Start or stop not allowed in the current state
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    /// Source settings are unusable
    #[error("invalid source configuration: {0}")]
    InvalidConfig(String),
}

/// Counters kept by a source
#[derive(Debug, Default)]
pub struct SourceCounters {
    /// Currently open connections
    pub connections_active: AtomicU64,

    /// Connections accepted since start
    pub connections_total: AtomicU64,

    /// Handshakes answered with a rejection
    pub handshakes_rejected: AtomicU64,

    /// `append` calls decoded
    pub append_received: AtomicU64,

    /// `append` calls answered OK
    pub append_accepted: AtomicU64,

    /// `append_batch` calls decoded
    pub append_batch_received: AtomicU64,

    /// `append_batch` calls answered OK
    pub append_batch_accepted: AtomicU64,

    /// Events carried by decoded calls
    pub events_received: AtomicU64,

    /// Events in calls answered OK
    pub events_accepted: AtomicU64,

    /// Frames or call bodies that failed to decode
    pub decode_errors: AtomicU64,
}

impl SourceCounters {
    pub const fn new() -> Self {
        Self {
            connections_active: AtomicU64::new(0),
            connections_total: AtomicU64::new(0),
            handshakes_rejected: AtomicU64::new(0),
            append_received: AtomicU64::new(0),
            append_accepted: AtomicU64::new(0),
            append_batch_received: AtomicU64::new(0),
            append_batch_accepted: AtomicU64::new(0),
            events_received: AtomicU64::new(0),
            events_accepted: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
        }
    }

    /// Increment active connections
    #[inline]
    pub fn connection_opened(&self) {
        self.connections_active.fetch_add(1, Ordering::Relaxed);
        self.connections_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrement active connections
    #[inline]
    pub fn connection_closed(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn handshake_rejected(&self) {
        self.handshakes_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a decoded call
    #[inline]
    pub fn call_received(&self, batch: bool, events: usize) {
        if batch {
            self.append_batch_received.fetch_add(1, Ordering::Relaxed);
        } else {
            self.append_received.fetch_add(1, Ordering::Relaxed);
        }
        self.events_received
            .fetch_add(events as u64, Ordering::Relaxed);
    }

    /// Record a call answered OK
    #[inline]
    pub fn call_accepted(&self, batch: bool, events: usize) {
        if batch {
            self.append_batch_accepted.fetch_add(1, Ordering::Relaxed);
        } else {
            self.append_accepted.fetch_add(1, Ordering::Relaxed);
        }
        self.events_accepted
            .fetch_add(events as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot of all counters
    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            connections_active: self.connections_active.load(Ordering::Relaxed),
            connections_total: self.connections_total.load(Ordering::Relaxed),
            handshakes_rejected: self.handshakes_rejected.load(Ordering::Relaxed),
            append_received: self.append_received.load(Ordering::Relaxed),
            append_accepted: self.append_accepted.load(Ordering::Relaxed),
            append_batch_received: self.append_batch_received.load(Ordering::Relaxed),
            append_batch_accepted: self.append_batch_accepted.load(Ordering::Relaxed),
            events_received: self.events_received.load(Ordering::Relaxed),
            events_accepted: self.events_accepted.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time snapshot of source counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CountersSnapshot {
    pub connections_active: u64,
    pub connections_total: u64,
    pub handshakes_rejected: u64,
    pub append_received: u64,
    pub append_accepted: u64,
    pub append_batch_received: u64,
    pub append_batch_accepted: u64,
    pub events_received: u64,
    pub events_accepted: u64,
    pub decode_errors: u64,
}
