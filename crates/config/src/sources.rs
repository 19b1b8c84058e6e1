//! Source configuration
//!
//! ```toml
//! [sources.ingest]
//! bind = "0.0.0.0"
//! port = 4141
//! threads = 4
//! compression-type = "deflate"
//! queues = ["main", "audit"]
//!
//! [sources.ingest.selector]
//! type = "multiplexing"
//! header = "tenant"
//! default = ["main"]
//! mapping = { acme = ["main", "audit"] }
//! ```

use std::collections::HashMap;
use std::time::Duration;

use conduit_protocol::{CompressionType, ProtocolError};
use serde::Deserialize;

/// Default worker count
pub const DEFAULT_THREADS: usize = 4;

/// Default shutdown grace in milliseconds
pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 5_000;

/// One RPC source
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SourceConfig {
    /// Whether this source is started
    pub enabled: bool,

    /// Bind address
    pub bind: String,

    /// Listen port (0 = any free port)
    pub port: u16,

    /// Worker tasks answering calls
    pub threads: usize,

    /// `none` or `deflate`
    pub compression_type: String,

    /// Queues this source writes to
    pub queues: Vec<String>,

    /// How events are spread over `queues`
    pub selector: SelectorConfig,

    /// Milliseconds workers get to finish on stop
    pub shutdown_grace: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: "0.0.0.0".into(),
            port: 0,
            threads: DEFAULT_THREADS,
            compression_type: "none".into(),
            queues: Vec::new(),
            selector: SelectorConfig::default(),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE_MS,
        }
    }
}

impl SourceConfig {
    /// Parsed compression mode
    pub fn compression(&self) -> Result<CompressionType, ProtocolError> {
        CompressionType::parse(&self.compression_type)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace)
    }
}

/// Selector kind
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SelectorType {
    /// Every event to every queue (default)
    #[default]
    Replicating,
    /// Queue chosen by a header value
    Multiplexing,
}

/// Channel selector settings
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "kebab-case")]
pub struct SelectorConfig {
    #[serde(rename = "type")]
    pub selector_type: SelectorType,

    /// Replicating: queues whose failures do not fail the call
    pub optional: Vec<String>,

    /// Multiplexing: header holding the routing value
    pub header: Option<String>,

    /// Multiplexing: header value to required queues
    pub mapping: HashMap<String, Vec<String>>,

    /// Multiplexing: header value to optional queues
    pub optional_mapping: HashMap<String, Vec<String>>,

    /// Multiplexing: required queues for unmatched values
    pub default: Vec<String>,
}

impl SelectorConfig {
    /// Every queue name this selector mentions
    pub fn referenced_queues(&self) -> impl Iterator<Item = &str> {
        self.optional
            .iter()
            .chain(self.mapping.values().flatten())
            .chain(self.optional_mapping.values().flatten())
            .chain(self.default.iter())
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: SourceConfig = toml::from_str("port = 4141").unwrap();
        assert!(config.enabled);
        assert_eq!(config.bind, "0.0.0.0");
        assert_eq!(config.threads, 4);
        assert_eq!(config.compression().unwrap(), CompressionType::None);
        assert_eq!(config.shutdown_grace(), Duration::from_secs(5));
        assert_eq!(config.selector.selector_type, SelectorType::Replicating);
    }

    #[test]
    fn test_multiplexing_selector() {
        let toml = r#"
port = 4141
queues = ["a", "b", "c"]

[selector]
type = "multiplexing"
header = "region"
default = ["a"]
mapping = { eu = ["b"], us = ["c"] }
optional-mapping = { eu = ["c"] }
"#;
        let config: SourceConfig = toml::from_str(toml).unwrap();
        let selector = &config.selector;
        assert_eq!(selector.selector_type, SelectorType::Multiplexing);
        assert_eq!(selector.header.as_deref(), Some("region"));
        assert_eq!(selector.mapping["eu"], vec!["b"]);
        assert_eq!(selector.optional_mapping["eu"], vec!["c"]);

        let mut referenced: Vec<_> = selector.referenced_queues().collect();
        referenced.sort_unstable();
        assert_eq!(referenced, vec!["a", "b", "c", "c"]);
    }

    #[test]
    fn test_bad_compression() {
        let config: SourceConfig = toml::from_str("compression-type = \"zstd\"").unwrap();
        assert!(config.compression().is_err());
    }
}
