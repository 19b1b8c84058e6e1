//! RPC Source - receives batches from remote sinks
//!
//! Listens for sink connections speaking the binary RPC protocol and hands
//! every decoded call to a [`Responder`] through a bounded worker pool.
//!
//! # Design
//!
//! ```text
//!                 ┌─ connection task ─┐               ┌─ worker ─┐
//! accept loop ──→ │ decode + inflate  │ ──mpmc────→   │ Responder │
//!                 │ await reply       │ ←─oneshot──   └──────────┘
//!                 └───────────────────┘
//! ```
//!
//! - One task per connection; calls on a connection are answered in order
//! - `threads` workers share one bounded `crossfire::mpmc` queue
//! - `stop()` cancels the accept loop and stops every connection reading;
//!   calls already queued are answered if they finish within `shutdown_grace`
//!
//! # Example
//!
//! ```ignore
//! let responder = Arc::new(ProcessorResponder::new(processor));
//! let mut source = RpcSource::new("ingest", RpcSourceConfig::with_port(4141), responder)?;
//!
//! let addr = source.start().await?;
//! // ...
//! source.stop().await?;
//! ```

mod connection;
mod worker;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use conduit_pipeline::{Lifecycle, LifecycleError, LifecycleHandle, LifecycleState};
use conduit_protocol::{Codec, CompressionType};
use socket2::{SockRef, TcpKeepalive};
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::common::{SourceCounters, SourceError};
use crate::responder::Responder;

use connection::ConnectionContext;
use worker::PendingCall;

/// Default number of worker tasks
pub const DEFAULT_THREADS: usize = 4;

/// Default time workers get to finish in-flight calls on stop
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Pending call slots per worker
const PENDING_CALLS_PER_WORKER: usize = 16;

/// TCP keep-alive time on accepted connections
const KEEPALIVE_TIME: Duration = Duration::from_secs(60);

/// RPC source configuration
#[derive(Debug, Clone)]
pub struct RpcSourceConfig {
    /// Bind address (e.g., "0.0.0.0")
    pub bind: String,

    /// Listen port, 0 for any free port
    pub port: u16,

    /// Worker tasks answering calls
    pub threads: usize,

    /// Compression mode clients must use
    pub compression: CompressionType,

    /// Time workers get to drain on stop
    pub shutdown_grace: Duration,

    /// Enable TCP keep-alive on accepted connections
    pub keepalive: bool,
}

impl Default for RpcSourceConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 4141,
            threads: DEFAULT_THREADS,
            compression: CompressionType::None,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            keepalive: true,
        }
    }
}

impl RpcSourceConfig {
    /// Create config with a specific port
    pub fn with_port(port: u16) -> Self {
        Self {
            port,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_bind(mut self, bind: impl Into<String>) -> Self {
        self.bind = bind.into();
        self
    }

    #[must_use]
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    #[must_use]
    pub fn with_compression(mut self, compression: CompressionType) -> Self {
        self.compression = compression;
        self
    }

    #[must_use]
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Get the bind address as a string
    pub fn bind_address(&self) -> String {
        if self.bind.contains(':') {
            format!("[{}]:{}", self.bind, self.port)
        } else {
            format!("{}:{}", self.bind, self.port)
        }
    }
}

/// Tasks owned by a started source
#[derive(Debug)]
struct Running {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    accept: tokio::task::JoinHandle<()>,
    workers: JoinSet<()>,
}

/// Source receiving RPC calls from remote sinks
pub struct RpcSource {
    /// Source name for logging
    name: String,

    config: RpcSourceConfig,

    responder: Arc<dyn Responder>,

    lifecycle: Lifecycle,

    counters: Arc<SourceCounters>,

    running: Option<Running>,
}

impl std::fmt::Debug for RpcSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcSource")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &self.lifecycle.state())
            .finish_non_exhaustive()
    }
}

impl RpcSource {
    /// Create a source answering calls with `responder`
    pub fn new(
        name: impl Into<String>,
        config: RpcSourceConfig,
        responder: Arc<dyn Responder>,
    ) -> Result<Self, SourceError> {
        let name = name.into();
        if config.threads == 0 {
            return Err(SourceError::InvalidConfig(format!(
                "{name}: threads must be > 0"
            )));
        }

        Ok(Self {
            lifecycle: Lifecycle::new(name.clone()),
            name,
            config,
            responder,
            counters: Arc::new(SourceCounters::new()),
            running: None,
        })
    }

    /// Bind, spawn the workers and start accepting
    ///
    /// Returns the bound address. A bind failure moves the source to
    /// `Error`; it may be started again later.
    pub async fn start(&mut self) -> Result<SocketAddr, SourceError> {
        let state = self.lifecycle.state();
        if !state.can_transition_to(LifecycleState::Start) {
            return Err(LifecycleError::InvalidTransition {
                component: self.name.clone(),
                from: state,
                to: LifecycleState::Start,
            }
            .into());
        }

        let address = self.config.bind_address();
        let listener = match TcpListener::bind(&address).await {
            Ok(listener) => listener,
            Err(source) => {
                let err = SourceError::Bind { address, source };
                tracing::error!(source = %self.name, error = %err, "rpc source failed to start");
                self.lifecycle.fail(&err)?;
                return Err(err);
            }
        };
        let local_addr = match listener.local_addr() {
            Ok(addr) => addr,
            Err(source) => {
                let err = SourceError::Bind { address, source };
                self.lifecycle.fail(&err)?;
                return Err(err);
            }
        };

        let (calls_tx, calls_rx) = crossfire::mpmc::bounded_async::<PendingCall>(
            self.config.threads * PENDING_CALLS_PER_WORKER,
        );

        let mut workers = JoinSet::new();
        for id in 0..self.config.threads {
            workers.spawn(worker::run_worker(
                id,
                calls_rx.clone(),
                Arc::clone(&self.responder),
                Arc::clone(&self.counters),
            ));
        }
        drop(calls_rx);

        let ctx = Arc::new(ConnectionContext {
            source: self.name.clone(),
            codec: Codec::new(self.config.compression, 0)
                .map_err(|e| SourceError::InvalidConfig(e.to_string()))?,
            responder: Arc::clone(&self.responder),
            calls: calls_tx,
            counters: Arc::clone(&self.counters),
        });

        let cancel = CancellationToken::new();
        let accept = tokio::spawn(accept_loop(
            listener,
            ctx,
            self.config.keepalive,
            cancel.clone(),
        ));

        self.running = Some(Running {
            local_addr,
            cancel,
            accept,
            workers,
        });
        self.lifecycle.transition(LifecycleState::Start)?;

        tracing::info!(
            source = %self.name,
            address = %local_addr,
            threads = self.config.threads,
            compression = %self.config.compression,
            "rpc source listening"
        );
        Ok(local_addr)
    }

    /// Stop accepting, close connections and drain the workers
    ///
    /// Idle connections close at once. A call already handed to the workers
    /// is completed and answered, all within `shutdown_grace`; whatever is
    /// still running after that is aborted.
    pub async fn stop(&mut self) -> Result<(), SourceError> {
        let state = self.lifecycle.state();
        if !state.can_transition_to(LifecycleState::Stop) {
            return Err(LifecycleError::InvalidTransition {
                component: self.name.clone(),
                from: state,
                to: LifecycleState::Stop,
            }
            .into());
        }

        if let Some(running) = self.running.take() {
            let Running {
                cancel,
                mut accept,
                mut workers,
                ..
            } = running;

            let deadline = Instant::now() + self.config.shutdown_grace;
            cancel.cancel();
            // Accept loop owns the connections; once it returns, every
            // sender of the call queue is gone. Connections with a call in
            // flight write its reply before closing.
            match tokio::time::timeout_at(deadline, &mut accept).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(source = %self.name, error = %e, "accept loop panicked");
                }
                Err(_) => {
                    tracing::warn!(
                        source = %self.name,
                        grace_ms = self.config.shutdown_grace.as_millis() as u64,
                        "connections did not finish in time, aborting"
                    );
                    accept.abort();
                    let _ = accept.await;
                }
            }

            let drained = tokio::time::timeout_at(deadline, async {
                while workers.join_next().await.is_some() {}
            })
            .await;
            if drained.is_err() {
                tracing::warn!(
                    source = %self.name,
                    grace_ms = self.config.shutdown_grace.as_millis() as u64,
                    remaining = workers.len(),
                    "workers did not finish in time, aborting"
                );
                workers.shutdown().await;
            }
        }

        self.lifecycle.transition(LifecycleState::Stop)?;

        let snapshot = self.counters.snapshot();
        tracing::info!(
            source = %self.name,
            connections = snapshot.connections_total,
            events_received = snapshot.events_received,
            events_accepted = snapshot.events_accepted,
            decode_errors = snapshot.decode_errors,
            "rpc source stopped"
        );
        Ok(())
    }

    /// Get the source name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &RpcSourceConfig {
        &self.config
    }

    /// Bound address while started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|running| running.local_addr)
    }

    pub fn lifecycle_state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    /// Read-only lifecycle view for waiters
    pub fn lifecycle_handle(&self) -> LifecycleHandle {
        self.lifecycle.handle()
    }

    /// Message of the last start failure
    pub fn last_error(&self) -> Option<String> {
        self.lifecycle.last_error()
    }

    /// Get reference to counters
    pub fn counters(&self) -> &SourceCounters {
        &self.counters
    }

    /// Counters handle that outlives the source
    pub fn counters_handle(&self) -> Arc<SourceCounters> {
        Arc::clone(&self.counters)
    }
}

impl Drop for RpcSource {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            running.cancel.cancel();
            running.accept.abort();
        }
    }
}

/// Accept connections until cancelled, then close them all
async fn accept_loop(
    listener: TcpListener,
    ctx: Arc<ConnectionContext>,
    keepalive: bool,
    cancel: CancellationToken,
) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            // Reap finished connection tasks
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            result = listener.accept() => match result {
                Ok((stream, peer)) => {
                    if keepalive {
                        let params = TcpKeepalive::new().with_time(KEEPALIVE_TIME);
                        if let Err(e) = SockRef::from(&stream).set_tcp_keepalive(&params) {
                            tracing::debug!(peer = %peer, error = %e, "failed to set TCP keep-alive");
                        }
                    }
                    connections.spawn(connection::serve(
                        Arc::clone(&ctx),
                        stream,
                        peer,
                        cancel.child_token(),
                    ));
                }
                Err(e) => {
                    // Transient accept errors - log and continue
                    tracing::warn!(source = %ctx.source, error = %e, "accept error");
                }
            },
        }
    }

    drop(listener);
    while connections.join_next().await.is_some() {}
}
