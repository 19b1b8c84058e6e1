//! Sink configuration
//!
//! ```toml
//! [sinks.upstream]
//! hostname = "collector.internal"
//! port = 4141
//! queue = "main"
//! batch-size = 500
//! compression-type = "deflate"
//! compression-level = 6
//! reset-connection-interval = 300000
//!
//! [sinks.upstream.runner]
//! backoff-increment = 1000
//! max-backoff = 5000
//! ```

use std::time::Duration;

use conduit_protocol::{CompressionType, DEFAULT_COMPRESSION_LEVEL, ProtocolError};
use serde::Deserialize;

/// Default events per call
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Default connect and request timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 20_000;

/// One RPC sink
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SinkConfig {
    /// Whether this sink is started
    pub enabled: bool,

    /// Remote source host
    pub hostname: String,

    /// Remote source port
    pub port: u16,

    /// Queue this sink drains
    pub queue: String,

    /// Maximum events per call
    pub batch_size: usize,

    /// Milliseconds allowed for connect plus handshake
    pub connect_timeout: u64,

    /// Milliseconds allowed for a reply
    pub request_timeout: u64,

    /// `none` or `deflate`
    pub compression_type: String,

    /// Deflate level 0-9
    pub compression_level: u32,

    /// Milliseconds after which the connection is re-established
    pub reset_connection_interval: Option<u64>,

    /// Poll loop settings
    pub runner: RunnerConfig,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            hostname: String::new(),
            port: 0,
            queue: String::new(),
            batch_size: DEFAULT_BATCH_SIZE,
            connect_timeout: DEFAULT_TIMEOUT_MS,
            request_timeout: DEFAULT_TIMEOUT_MS,
            compression_type: "none".into(),
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            reset_connection_interval: None,
            runner: RunnerConfig::default(),
        }
    }
}

impl SinkConfig {
    /// Parsed compression mode
    pub fn compression(&self) -> Result<CompressionType, ProtocolError> {
        CompressionType::parse(&self.compression_type)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout)
    }

    pub fn reset_connection_interval(&self) -> Option<Duration> {
        self.reset_connection_interval.map(Duration::from_millis)
    }
}

/// Backoff of the loop driving a sink, in milliseconds
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "kebab-case")]
pub struct RunnerConfig {
    /// Added per consecutive empty poll
    pub backoff_increment: u64,

    /// Upper bound on any sleep
    pub max_backoff: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            backoff_increment: 1_000,
            max_backoff: 5_000,
        }
    }
}

impl RunnerConfig {
    pub fn backoff_increment(&self) -> Duration {
        Duration::from_millis(self.backoff_increment)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff)
    }
}
