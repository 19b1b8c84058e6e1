//! Conduit - Sinks
//!
//! Sink transports that drain a local queue towards a remote source.
//!
//! # Architecture
//!
//! ```text
//! MemoryQueue ──take──→ RpcSink ──append/append_batch──→ RpcSource
//!      ↑                   │
//!      └────rollback───────┘  (on any failure)
//! ```
//!
//! `RpcSink::process()` delivers at most one batch per call. `SinkRunner`
//! calls it in a loop with linear backoff while the queue is empty.
//!
//! # Example
//!
//! ```ignore
//! use conduit_sinks::{RpcSink, RpcSinkConfig, RunnerConfig, SinkRunner};
//!
//! let sink = RpcSink::new("upstream", RpcSinkConfig::new("10.0.0.7", 4141), queue)?;
//! let runner = SinkRunner::new(sink, RunnerConfig::default());
//!
//! tokio::spawn(runner.run(cancel.child_token()));
//! ```

mod common;
mod runner;

/// RPC sink - batch delivery over the binary RPC protocol
pub mod rpc;

pub use common::{CountersSnapshot, DeliveryError, SinkCounters, TransportStatus};
pub use rpc::{RpcSink, RpcSinkConfig};
pub use runner::{DEFAULT_BACKOFF_INCREMENT, DEFAULT_MAX_BACKOFF, RunnerConfig, SinkRunner};
