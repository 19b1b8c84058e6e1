//! Common types for sinks
//!
//! Delivery outcome, delivery errors and the counters every sink keeps.

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use conduit_pipeline::{LifecycleState, QueueError};
use conduit_protocol::{CompressionType, ProtocolError};
use thiserror::Error;

/// Outcome of one successful `process()` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportStatus {
    /// A batch was sent and acknowledged
    Ready,
    /// The queue had nothing to send
    Backoff,
}

impl fmt::Display for TransportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready => f.write_str("READY"),
            Self::Backoff => f.write_str("BACKOFF"),
        }
    }
}

/// Why a batch was not delivered
///
/// Whatever the variant, the events taken for the batch are back in the
/// queue when this is returned.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Connect plus handshake did not finish in time
    #[error("connect to {target} timed out after {}ms", timeout.as_millis())]
    ConnectTimeout { target: String, timeout: Duration },

    /// No reply within the request timeout
    #[error("request to {target} timed out after {}ms", timeout.as_millis())]
    RequestTimeout { target: String, timeout: Duration },

    /// Remote answered with an error status
    #[error("{target} rejected batch of {events} events")]
    RemoteRejected { target: String, events: usize },

    /// TCP connect, read or write failed
    #[error("connection to {target} failed: {source}")]
    Connection {
        target: String,
        #[source]
        source: io::Error,
    },

    /// Peer sent something this side cannot understand
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Remote uses a different compression mode
    #[error("compression mismatch: sink uses '{local}', source expects '{remote}'")]
    CompressionMismatch {
        local: CompressionType,
        remote: CompressionType,
    },

    /// Taking events from the local queue failed
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    /// Shutdown interrupted the call
    #[error("delivery cancelled by shutdown")]
    Cancelled,

    /// `process()` called outside the `START` state
    #[error("sink is not started (state {0})")]
    Inactive(LifecycleState),

    /// Sink settings are unusable
    #[error("invalid sink configuration: {0}")]
    InvalidConfig(String),
}

impl DeliveryError {
    /// Create a connection error
    pub fn connection(target: impl Into<String>, source: io::Error) -> Self {
        Self::Connection {
            target: target.into(),
            source,
        }
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Whether a later attempt may succeed without intervention
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectTimeout { .. }
                | Self::RequestTimeout { .. }
                | Self::RemoteRejected { .. }
                | Self::Connection { .. }
                | Self::Protocol(_)
        )
    }
}

/// Counters kept by every sink
#[derive(Debug, Default)]
pub struct SinkCounters {
    /// Connections established (connect + handshake)
    pub connection_created: AtomicU64,

    /// Connections dropped after use
    pub connection_closed: AtomicU64,

    /// Connection attempts that failed
    pub connection_failed: AtomicU64,

    /// `process()` calls that found the queue empty
    pub batch_empty: AtomicU64,

    /// Batches smaller than the batch size
    pub batch_underflow: AtomicU64,

    /// Batches of exactly the batch size
    pub batch_complete: AtomicU64,

    /// Events taken for delivery
    pub event_drain_attempt: AtomicU64,

    /// Events acknowledged by the remote
    pub event_drain_success: AtomicU64,
}

impl SinkCounters {
    pub const fn new() -> Self {
        Self {
            connection_created: AtomicU64::new(0),
            connection_closed: AtomicU64::new(0),
            connection_failed: AtomicU64::new(0),
            batch_empty: AtomicU64::new(0),
            batch_underflow: AtomicU64::new(0),
            batch_complete: AtomicU64::new(0),
            event_drain_attempt: AtomicU64::new(0),
            event_drain_success: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn connection_created(&self) {
        self.connection_created.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn connection_closed(&self) {
        self.connection_closed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn connection_failed(&self) {
        self.connection_failed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn batch_empty(&self) {
        self.batch_empty.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a non-empty batch against the configured size
    #[inline]
    pub fn batch_taken(&self, events: usize, batch_size: usize) {
        if events < batch_size {
            self.batch_underflow.fetch_add(1, Ordering::Relaxed);
        } else {
            self.batch_complete.fetch_add(1, Ordering::Relaxed);
        }
        self.event_drain_attempt
            .fetch_add(events as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn event_drain_success(&self, events: usize) {
        self.event_drain_success
            .fetch_add(events as u64, Ordering::Relaxed);
    }

    /// Get snapshot of all counters
    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            connection_created: self.connection_created.load(Ordering::Relaxed),
            connection_closed: self.connection_closed.load(Ordering::Relaxed),
            connection_failed: self.connection_failed.load(Ordering::Relaxed),
            batch_empty: self.batch_empty.load(Ordering::Relaxed),
            batch_underflow: self.batch_underflow.load(Ordering::Relaxed),
            batch_complete: self.batch_complete.load(Ordering::Relaxed),
            event_drain_attempt: self.event_drain_attempt.load(Ordering::Relaxed),
            event_drain_success: self.event_drain_success.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time snapshot of sink counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CountersSnapshot {
    pub connection_created: u64,
    pub connection_closed: u64,
    pub connection_failed: u64,
    pub batch_empty: u64,
    pub batch_underflow: u64,
    pub batch_complete: u64,
    pub event_drain_attempt: u64,
    pub event_drain_success: u64,
}

#[cfg(test)]
#[path = "common_test.rs"]
mod common_test;
