//! RPC Sink - batch delivery to a remote source
//!
//! Drains a [`MemoryQueue`] in batches and ships each batch as one
//! `append` / `append_batch` call to a remote `RpcSource`.
//!
//! # Delivery
//!
//! Every `process()` call is one queue transaction:
//!
//! ```text
//! take ≤ batch_size ──→ encode ──→ call ──→ Reply OK ──→ commit
//!                                     └──→ anything else ──→ rollback
//! ```
//!
//! Taken events stay in the queue until the remote acknowledged them, so a
//! failed call loses nothing and a successful one is never resent.
//!
//! # Example
//!
//! ```ignore
//! let config = RpcSinkConfig::new("collector.internal", 4141)
//!     .with_batch_size(500)
//!     .with_compression(CompressionType::Deflate);
//!
//! let mut sink = RpcSink::new("upstream", config, queue)?;
//! sink.start()?;
//!
//! match sink.process().await? {
//!     TransportStatus::Ready => {}
//!     TransportStatus::Backoff => tokio::time::sleep(idle).await,
//! }
//! ```

mod connection;

use std::sync::Arc;
use std::time::Duration;

use conduit_pipeline::{
    Lifecycle, LifecycleError, LifecycleHandle, LifecycleState, MemoryQueue,
};
use conduit_protocol::{
    CALL_HEADER_SIZE, Codec, CompressionType, DEFAULT_COMPRESSION_LEVEL, Event, MAX_FRAME_SIZE,
    ProtocolError, RemoteStatus, encode_batch_body, encode_event_body,
};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::common::{DeliveryError, SinkCounters, TransportStatus};

pub use connection::{Link, RpcConnection};

/// Default number of events per call
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Default connect and request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

/// Configuration for the RPC sink
#[derive(Debug, Clone)]
pub struct RpcSinkConfig {
    /// Remote source host
    pub hostname: String,

    /// Remote source port
    pub port: u16,

    /// Maximum events per call
    pub batch_size: usize,

    /// Bound on TCP connect plus handshake
    pub connect_timeout: Duration,

    /// Bound on waiting for a call's reply
    pub request_timeout: Duration,

    /// Compression mode, must match the source
    pub compression: CompressionType,

    /// Deflate level (0-9), ignored without compression
    pub compression_level: u32,

    /// Reconnect once the connection is older than this
    pub reset_connection_interval: Option<Duration>,

    /// TCP keep-alive time, `None` to leave it off
    pub tcp_keepalive: Option<Duration>,
}

impl RpcSinkConfig {
    /// Create a config with defaults for everything but the endpoint
    pub fn new(hostname: impl Into<String>, port: u16) -> Self {
        Self {
            hostname: hostname.into(),
            port,
            batch_size: DEFAULT_BATCH_SIZE,
            connect_timeout: DEFAULT_TIMEOUT,
            request_timeout: DEFAULT_TIMEOUT,
            compression: CompressionType::None,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            reset_connection_interval: None,
            tcp_keepalive: Some(Duration::from_secs(30)),
        }
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_compression(mut self, compression: CompressionType) -> Self {
        self.compression = compression;
        self
    }

    #[must_use]
    pub fn with_compression_level(mut self, level: u32) -> Self {
        self.compression_level = level;
        self
    }

    #[must_use]
    pub fn with_reset_connection_interval(mut self, interval: Option<Duration>) -> Self {
        self.reset_connection_interval = interval;
        self
    }

    #[must_use]
    pub fn with_tcp_keepalive(mut self, keepalive: Option<Duration>) -> Self {
        self.tcp_keepalive = keepalive;
        self
    }

    /// `host:port` address of the remote source
    pub fn target(&self) -> String {
        if self.hostname.contains(':') {
            format!("[{}]:{}", self.hostname, self.port)
        } else {
            format!("{}:{}", self.hostname, self.port)
        }
    }
}

/// Sink delivering queue batches over RPC
#[derive(Debug)]
pub struct RpcSink {
    /// Sink name for logging
    name: String,

    config: RpcSinkConfig,

    /// `host:port`, computed once
    target: String,

    codec: Codec,

    queue: Arc<MemoryQueue>,

    link: Link,

    lifecycle: Lifecycle,

    /// Cancelled by `stop()`; interrupts connect and reply waits
    shutdown: CancellationToken,

    counters: Arc<SinkCounters>,
}

impl RpcSink {
    /// Create a sink draining `queue`
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the batch size is zero or larger than the
    /// queue's transaction capacity, or if the compression level is out of
    /// range.
    pub fn new(
        name: impl Into<String>,
        config: RpcSinkConfig,
        queue: Arc<MemoryQueue>,
    ) -> Result<Self, DeliveryError> {
        let name = name.into();

        if config.batch_size == 0 {
            return Err(DeliveryError::config(format!("{name}: batch-size must be > 0")));
        }
        if config.batch_size > queue.transaction_capacity() {
            return Err(DeliveryError::config(format!(
                "{name}: batch-size {} exceeds transaction capacity {} of queue '{}'",
                config.batch_size,
                queue.transaction_capacity(),
                queue.name()
            )));
        }
        let codec = Codec::new(config.compression, config.compression_level)
            .map_err(|e| DeliveryError::config(format!("{name}: {e}")))?;

        Ok(Self {
            target: config.target(),
            lifecycle: Lifecycle::new(name.clone()),
            name,
            config,
            codec,
            queue,
            link: Link::Absent,
            shutdown: CancellationToken::new(),
            counters: Arc::new(SinkCounters::new()),
        })
    }

    /// Allow `process()` to run
    pub fn start(&mut self) -> Result<(), LifecycleError> {
        self.lifecycle.transition(LifecycleState::Start)?;
        tracing::info!(
            sink = %self.name,
            endpoint = %self.target,
            batch_size = self.config.batch_size,
            compression = %self.codec.compression(),
            "rpc sink started"
        );
        Ok(())
    }

    /// Interrupt pending waits, close the connection and stop
    ///
    /// A rejected transition leaves the sink untouched.
    pub fn stop(&mut self) -> Result<(), LifecycleError> {
        let state = self.lifecycle.state();
        if !state.can_transition_to(LifecycleState::Stop) {
            return Err(LifecycleError::InvalidTransition {
                component: self.name.clone(),
                from: state,
                to: LifecycleState::Stop,
            });
        }

        self.shutdown.cancel();
        self.close_link();
        self.lifecycle.transition(LifecycleState::Stop)?;

        let snapshot = self.counters.snapshot();
        tracing::info!(
            sink = %self.name,
            connections_created = snapshot.connection_created,
            connections_failed = snapshot.connection_failed,
            batches_complete = snapshot.batch_complete,
            batches_underflow = snapshot.batch_underflow,
            batches_empty = snapshot.batch_empty,
            events_attempted = snapshot.event_drain_attempt,
            events_delivered = snapshot.event_drain_success,
            "rpc sink stopped"
        );
        Ok(())
    }

    /// Deliver at most one batch
    ///
    /// Returns `Backoff` when the queue is empty. On error every taken event
    /// is back in the queue and the connection is dropped.
    pub async fn process(&mut self) -> Result<TransportStatus, DeliveryError> {
        let state = self.lifecycle.state();
        if state != LifecycleState::Start {
            return Err(DeliveryError::Inactive(state));
        }

        let queue = Arc::clone(&self.queue);
        let mut tx = queue.transaction();

        let mut events = Vec::with_capacity(self.config.batch_size);
        while events.len() < self.config.batch_size {
            match tx.take()? {
                Some(event) => events.push(event),
                None => break,
            }
        }

        if events.is_empty() {
            tx.rollback()?;
            self.counters.batch_empty();
            return Ok(TransportStatus::Backoff);
        }
        self.counters.batch_taken(events.len(), self.config.batch_size);

        match self.deliver(&events).await {
            Ok(()) => {
                tx.commit()?;
                self.counters.event_drain_success(events.len());
                tracing::trace!(sink = %self.name, events = events.len(), "batch delivered");
                Ok(TransportStatus::Ready)
            }
            Err(e) => {
                tx.rollback()?;
                tracing::warn!(
                    sink = %self.name,
                    endpoint = %self.target,
                    events = events.len(),
                    error = %e,
                    "batch delivery failed, events kept in queue"
                );
                Err(e)
            }
        }
    }

    /// Send one call, keeping the connection only on an OK reply
    async fn deliver(&mut self, events: &[Event]) -> Result<(), DeliveryError> {
        let body = match events {
            [event] => encode_event_body(event, &self.codec)?,
            _ => encode_batch_body(events, &self.codec)?,
        };
        // The source would drop the connection on this frame, every retry
        let frame_len = CALL_HEADER_SIZE + body.len();
        if frame_len > MAX_FRAME_SIZE {
            return Err(ProtocolError::frame_too_large(frame_len, MAX_FRAME_SIZE).into());
        }

        let mut conn = self.connection().await?;

        let outcome = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(DeliveryError::Cancelled),
            result = timeout(self.config.request_timeout, conn.call(events.len(), body)) => {
                match result {
                    Ok(result) => result,
                    Err(_) => Err(DeliveryError::RequestTimeout {
                        target: self.target.clone(),
                        timeout: self.config.request_timeout,
                    }),
                }
            }
        };

        match outcome {
            Ok(RemoteStatus::Ok) => {
                self.link = Link::Established(conn);
                Ok(())
            }
            Ok(RemoteStatus::Error) => {
                self.counters.connection_closed();
                Err(DeliveryError::RemoteRejected {
                    target: self.target.clone(),
                    events: events.len(),
                })
            }
            Err(e) => {
                self.counters.connection_closed();
                Err(e)
            }
        }
    }

    /// Reuse the established connection or open a new one
    async fn connection(&mut self) -> Result<RpcConnection, DeliveryError> {
        if let Some(conn) = self.link.take() {
            match self.config.reset_connection_interval {
                Some(interval) if conn.age() >= interval => {
                    tracing::debug!(
                        sink = %self.name,
                        age_ms = conn.age().as_millis() as u64,
                        "connection reset interval reached, reconnecting"
                    );
                    self.counters.connection_closed();
                }
                _ => return Ok(conn),
            }
        }

        let open = RpcConnection::open(
            &self.target,
            self.codec.compression(),
            self.config.tcp_keepalive,
        );
        let result = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(DeliveryError::Cancelled),
            result = timeout(self.config.connect_timeout, open) => match result {
                Ok(result) => result,
                Err(_) => Err(DeliveryError::ConnectTimeout {
                    target: self.target.clone(),
                    timeout: self.config.connect_timeout,
                }),
            },
        };

        match result {
            Ok(conn) => {
                self.counters.connection_created();
                tracing::debug!(sink = %self.name, endpoint = %self.target, "connected");
                Ok(conn)
            }
            Err(e) => {
                self.counters.connection_failed();
                Err(e)
            }
        }
    }

    fn close_link(&mut self) {
        if self.link.take().is_some() {
            self.counters.connection_closed();
        }
    }

    /// Get the sink name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &RpcSinkConfig {
        &self.config
    }

    /// Whether a connection is currently held
    pub fn is_connected(&self) -> bool {
        self.link.is_established()
    }

    pub fn lifecycle_state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    /// Read-only lifecycle view for waiters
    pub fn lifecycle_handle(&self) -> LifecycleHandle {
        self.lifecycle.handle()
    }

    /// Token cancelled by `stop()`
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Get reference to counters
    pub fn counters(&self) -> &SinkCounters {
        &self.counters
    }

    /// Counters handle that outlives the sink
    pub fn counters_handle(&self) -> Arc<SinkCounters> {
        Arc::clone(&self.counters)
    }
}

#[cfg(test)]
#[path = "rpc_test.rs"]
mod rpc_test;
