//! Conduit Configuration
//!
//! TOML-based configuration loading with sensible defaults.
//! Only queues are mandatory; every other value has a default.
//!
//! # Parsing
//!
//! Use the `FromStr` trait to parse configuration:
//!
//! ```
//! use conduit_config::Config;
//! use std::str::FromStr;
//!
//! let config = Config::from_str("[queues.main]").unwrap();
//! assert!(config.queues.contains_key("main"));
//! ```
//!
//! # Example Config
//!
//! ```toml
//! [log]
//! level = "info"
//!
//! [queues.main]
//! capacity = 10000
//! transaction-capacity = 500
//!
//! [sources.ingest]
//! port = 4141
//! queues = ["main"]
//!
//! [sinks.upstream]
//! hostname = "collector.internal"
//! port = 4141
//! queue = "main"
//! batch-size = 500
//! ```

mod error;
mod logging;
mod queues;
mod sinks;
mod sources;
mod validation;

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::str::FromStr;

pub use error::{ConfigError, Result};
pub use logging::{LogConfig, LogFormat, LogLevel, LogOutput};
pub use queues::{DEFAULT_QUEUE_CAPACITY, DEFAULT_TRANSACTION_CAPACITY, QueueConfig};
pub use sinks::{DEFAULT_BATCH_SIZE, DEFAULT_TIMEOUT_MS, RunnerConfig, SinkConfig};
pub use sources::{
    DEFAULT_SHUTDOWN_GRACE_MS, DEFAULT_THREADS, SelectorConfig, SelectorType, SourceConfig,
};

use serde::Deserialize;

/// Main configuration structure
///
/// Components are keyed by name; the name shows up in logs and errors.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub log: LogConfig,

    /// Memory queues between sources and sinks
    pub queues: BTreeMap<String, QueueConfig>,

    /// RPC sources (listeners)
    pub sources: BTreeMap<String, SourceConfig>,

    /// RPC sinks (senders)
    pub sinks: BTreeMap<String, SinkConfig>,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read, contains invalid TOML,
    /// or fails validation.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::IoError {
            path: path.display().to_string(),
            source: e,
        })?;

        Self::from_str(&contents)
    }

    fn parse(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    ///
    /// Checks for:
    /// - Referenced queues exist
    /// - Required fields are present for enabled components
    /// - Port conflicts
    pub fn validate(&self) -> Result<()> {
        validation::validate_config(self)
    }

    /// Enabled sources, in name order
    pub fn enabled_sources(&self) -> impl Iterator<Item = (&str, &SourceConfig)> {
        self.sources
            .iter()
            .filter(|(_, source)| source.enabled)
            .map(|(name, source)| (name.as_str(), source))
    }

    /// Enabled sinks, in name order
    pub fn enabled_sinks(&self) -> impl Iterator<Item = (&str, &SinkConfig)> {
        self.sinks
            .iter()
            .filter(|(_, sink)| sink.enabled)
            .map(|(name, sink)| (name.as_str(), sink))
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    use conduit_protocol::CompressionType;

    #[test]
    fn test_minimal_config() {
        let config = Config::from_str("[queues.main]").unwrap();
        assert_eq!(config.queues["main"], QueueConfig::default());
        assert!(config.sources.is_empty());
        assert!(config.sinks.is_empty());
        assert_eq!(config.log.level, LogLevel::Info);
    }

    #[test]
    fn test_full_config_parse() {
        let toml = r#"
[log]
level = "debug"
format = "json"

[queues.main]
capacity = 1000
transaction-capacity = 50

[queues.audit]
capacity = 200
transaction-capacity = 20

[sources.ingest]
port = 4141
threads = 2
compression-type = "deflate"
queues = ["main", "audit"]
selector = { optional = ["audit"] }

[sources.spare]
enabled = false

[sinks.upstream]
hostname = "collector.internal"
port = 5151
queue = "main"
batch-size = 50
compression-type = "deflate"
compression-level = 1
request-timeout = 2500

[sinks.archive]
hostname = "archive.internal"
port = 5152
queue = "audit"
batch-size = 20
"#;
        let config = Config::from_str(toml).unwrap();

        assert_eq!(config.log.format, LogFormat::Json);
        assert_eq!(config.queues.len(), 2);

        let sources: Vec<_> = config.enabled_sources().map(|(name, _)| name).collect();
        assert_eq!(sources, vec!["ingest"]);
        let ingest = &config.sources["ingest"];
        assert_eq!(ingest.threads, 2);
        assert_eq!(ingest.compression().unwrap(), CompressionType::Deflate);
        assert_eq!(ingest.selector.optional, vec!["audit"]);

        let sinks: Vec<_> = config.enabled_sinks().map(|(name, _)| name).collect();
        assert_eq!(sinks, vec!["archive", "upstream"]);
        let upstream = &config.sinks["upstream"];
        assert_eq!(upstream.batch_size, 50);
        assert_eq!(upstream.compression_level, 1);
        assert_eq!(upstream.request_timeout(), Duration::from_millis(2500));
    }

    #[test]
    fn test_invalid_toml() {
        let result = Config::from_str("invalid { toml");
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_unknown_compression_type_value() {
        let toml = "[queues.q]\n[sources.s]\nport = 1\nqueues = [\"q\"]\ncompression-type = \"snappy\"";
        let err = Config::from_str(toml).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field: "compression-type", .. }));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[queues.main]\ncapacity = 10\ntransaction-capacity = 5").unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.queues["main"].capacity, 10);
        assert_eq!(config.queues["main"].transaction_capacity, 5);
    }

    #[test]
    fn test_from_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::from_file(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::IoError { .. }));
        assert!(err.to_string().contains("absent.toml"));
    }
}
