//! Conduit - Sources
//!
//! Network sources that receive event batches from remote sinks and hand
//! them to a [`Responder`], usually a [`ChannelProcessor`] writing to
//! memory queues.
//!
//! # Available Sources
//!
//! - **RPC** - length-prefixed binary RPC with optional deflate bodies
//!
//! # Design Principles
//!
//! - **Handshake first**: every connection negotiates protocol version and
//!   compression before its first call
//! - **Bounded work**: decoded calls wait in a bounded MPMC queue for a fixed
//!   pool of workers
//! - **Reply per call**: a sink gets `OK` only once every required queue
//!   committed the call's events
//!
//! # Example
//!
//! ```ignore
//! use conduit_sources::{ProcessorResponder, RpcSource, RpcSourceConfig};
//! use std::sync::Arc;
//!
//! let responder = Arc::new(ProcessorResponder::new(Arc::new(processor)));
//! let mut source = RpcSource::new("ingest", RpcSourceConfig::with_port(4141), responder)?;
//! source.start().await?;
//! ```
//!
//! [`ChannelProcessor`]: conduit_pipeline::ChannelProcessor

mod common;
mod responder;

/// RPC source - binary RPC listener with a worker pool
pub mod rpc;

pub use common::{CountersSnapshot, SourceCounters, SourceError};
pub use responder::{ProcessorResponder, Responder, negotiate};
pub use rpc::{DEFAULT_SHUTDOWN_GRACE, DEFAULT_THREADS, RpcSource, RpcSourceConfig};
