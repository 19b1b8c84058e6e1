//! Conduit - Pipeline
//!
//! Transactional plumbing between transports and queues.
//!
//! # Architecture
//!
//! ```text
//!                         ┌──→ MemoryQueue (required)
//! batch ──→ ChannelProcessor ──→ ChannelSelector ──┼──→ MemoryQueue (required)
//!                         └──→ MemoryQueue (optional)
//! ```
//!
//! # Key Design
//!
//! - **Transactions**: every queue access is a put/take/commit/rollback unit
//! - **Reserve on put**: capacity is claimed before commit, so a group of
//!   prepared transactions can always be committed together
//! - **Shared lifecycle**: sinks and sources publish `LifecycleState` on a
//!   `watch` channel for wait-without-polling

mod error;
mod lifecycle;
mod metrics;
mod processor;
mod queue;

pub use error::{LifecycleError, ProcessorError, QueueError, QueueResult, Result};
pub use lifecycle::{Lifecycle, LifecycleHandle, LifecycleState};
pub use metrics::{MetricsSnapshot, ProcessorMetrics};
pub use processor::ChannelProcessor;
pub use queue::{DEFAULT_CAPACITY, DEFAULT_TRANSACTION_CAPACITY, MemoryQueue, Transaction};
