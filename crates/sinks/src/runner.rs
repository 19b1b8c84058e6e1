//! Polling runner for a sink
//!
//! Calls `process()` back to back while batches flow, and sleeps with a
//! linear backoff while the queue is empty:
//!
//! ```text
//! Ready    ──→ process again immediately
//! Backoff  ──→ sleep min(increment × consecutive backoffs, max)
//! Err      ──→ log, sleep max
//! ```

use std::time::Duration;

use conduit_pipeline::LifecycleState;
use tokio_util::sync::CancellationToken;

use crate::common::{CountersSnapshot, DeliveryError, TransportStatus};
use crate::rpc::RpcSink;

/// Default sleep added per consecutive empty poll
pub const DEFAULT_BACKOFF_INCREMENT: Duration = Duration::from_secs(1);

/// Default upper bound on the backoff sleep
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(5);

/// Backoff settings for [`SinkRunner`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunnerConfig {
    pub backoff_increment: Duration,
    pub max_backoff: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            backoff_increment: DEFAULT_BACKOFF_INCREMENT,
            max_backoff: DEFAULT_MAX_BACKOFF,
        }
    }
}

impl RunnerConfig {
    /// Sleep after `consecutive` empty polls in a row
    pub fn backoff(&self, consecutive: u32) -> Duration {
        self.backoff_increment
            .saturating_mul(consecutive)
            .min(self.max_backoff)
    }
}

/// Drives one sink until cancelled
#[derive(Debug)]
pub struct SinkRunner {
    sink: RpcSink,
    config: RunnerConfig,
}

impl SinkRunner {
    pub fn new(sink: RpcSink, config: RunnerConfig) -> Self {
        Self { sink, config }
    }

    /// Get reference to the driven sink
    pub fn sink(&self) -> &RpcSink {
        &self.sink
    }

    /// Run until `cancel` fires, then stop the sink
    ///
    /// Starts the sink first if it is still idle. Returns the final counters.
    pub async fn run(mut self, cancel: CancellationToken) -> CountersSnapshot {
        let name = self.sink.name().to_string();

        if self.sink.lifecycle_state() != LifecycleState::Start
            && let Err(e) = self.sink.start()
        {
            tracing::error!(sink = %name, error = %e, "sink failed to start");
            return self.sink.counters().snapshot();
        }

        let mut consecutive_backoffs = 0u32;

        loop {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                result = self.sink.process() => result,
            };

            let pause = match result {
                Ok(TransportStatus::Ready) => {
                    consecutive_backoffs = 0;
                    continue;
                }
                Ok(TransportStatus::Backoff) => {
                    consecutive_backoffs = consecutive_backoffs.saturating_add(1);
                    self.config.backoff(consecutive_backoffs)
                }
                Err(DeliveryError::Cancelled | DeliveryError::Inactive(_)) => break,
                Err(e) => {
                    consecutive_backoffs = 0;
                    tracing::warn!(
                        sink = %name,
                        error = %e,
                        retry_in_ms = self.config.max_backoff.as_millis() as u64,
                        "sink delivery failed"
                    );
                    self.config.max_backoff
                }
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }

        if let Err(e) = self.sink.stop() {
            tracing::warn!(sink = %name, error = %e, "sink did not stop cleanly");
        }
        self.sink.counters().snapshot()
    }
}
