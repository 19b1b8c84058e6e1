//! Pipeline error types
//!
//! Errors for queue transactions, the channel processor and lifecycle
//! transitions.

use thiserror::Error;

use conduit_routing::QueueId;

use crate::lifecycle::LifecycleState;

/// Queue and transaction errors
#[derive(Debug, Error)]
pub enum QueueError {
    /// Committed, reserved and in-flight events fill the queue
    #[error("queue '{queue}' is full (capacity {capacity})")]
    QueueFull { queue: String, capacity: usize },

    /// Transaction already holds its maximum number of puts or takes
    #[error("transaction on queue '{queue}' is full (capacity {capacity})")]
    TransactionFull { queue: String, capacity: usize },

    /// Operation not allowed in the transaction's current state
    #[error("cannot {op} a {state} transaction")]
    InvalidState {
        op: &'static str,
        state: &'static str,
    },

    /// Capacity settings out of range
    #[error("queue '{queue}': {message}")]
    InvalidCapacity { queue: String, message: String },
}

impl QueueError {
    #[inline]
    pub fn invalid_state(op: &'static str, state: &'static str) -> Self {
        Self::InvalidState { op, state }
    }

    /// Whether the failure is a lack of space rather than misuse
    pub fn is_capacity(&self) -> bool {
        matches!(self, Self::QueueFull { .. } | Self::TransactionFull { .. })
    }
}

/// Channel processor errors
#[derive(Debug, Error)]
pub enum ProcessorError {
    /// A required queue refused the batch; nothing was committed
    #[error("required queue '{queue}' rejected batch: {source}")]
    Queue {
        queue: String,
        #[source]
        source: QueueError,
    },

    /// Selector references a queue the processor does not have
    #[error("selector routes to {0} but only {1} queues are attached")]
    UnknownQueue(QueueId, usize),
}

impl ProcessorError {
    #[inline]
    pub fn queue(queue: impl Into<String>, source: QueueError) -> Self {
        Self::Queue {
            queue: queue.into(),
            source,
        }
    }
}

/// Lifecycle transition errors
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("{component}: invalid lifecycle transition {from} -> {to}")]
    InvalidTransition {
        component: String,
        from: LifecycleState,
        to: LifecycleState,
    },
}

/// Result type for queue operations
pub type QueueResult<T> = std::result::Result<T, QueueError>;

/// Result type for processor operations
pub type Result<T> = std::result::Result<T, ProcessorError>;
