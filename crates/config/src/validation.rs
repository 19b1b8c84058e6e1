//! Configuration validation
//!
//! Validates config consistency:
//! - At least one queue is defined, with usable capacities
//! - Queues referenced by sources, selectors and sinks exist
//! - Required sink fields are present and values are in range
//! - No port conflicts between enabled sources

use std::collections::HashMap;

use conduit_protocol::MAX_COMPRESSION_LEVEL;

use crate::Config;
use crate::error::{ConfigError, Result};
use crate::sources::SelectorType;

/// Validate the entire configuration
pub fn validate_config(config: &Config) -> Result<()> {
    validate_queues(config)?;
    validate_sources(config)?;
    validate_sinks(config)?;
    Ok(())
}

fn validate_queues(config: &Config) -> Result<()> {
    if config.queues.is_empty() {
        return Err(ConfigError::NoQueues);
    }

    for (name, queue) in &config.queues {
        if queue.capacity == 0 {
            return Err(ConfigError::invalid_value(
                "queue",
                name,
                "capacity",
                "must be > 0",
            ));
        }
        if queue.transaction_capacity == 0 || queue.transaction_capacity > queue.capacity {
            return Err(ConfigError::invalid_value(
                "queue",
                name,
                "transaction-capacity",
                format!("must be between 1 and capacity ({})", queue.capacity),
            ));
        }
    }
    Ok(())
}

fn validate_sources(config: &Config) -> Result<()> {
    let mut ports: HashMap<u16, Vec<&str>> = HashMap::new();

    for (name, source) in config.sources.iter().filter(|(_, s)| s.enabled) {
        // Port 0 binds an ephemeral port, never a conflict
        if source.port != 0 {
            ports.entry(source.port).or_default().push(name);
        }

        if source.threads == 0 {
            return Err(ConfigError::invalid_value("source", name, "threads", "must be > 0"));
        }
        if let Err(e) = source.compression() {
            return Err(ConfigError::invalid_value(
                "source",
                name,
                "compression-type",
                e.to_string(),
            ));
        }

        if source.queues.is_empty() {
            return Err(ConfigError::missing_field("source", name, "queues"));
        }
        for queue in &source.queues {
            if !config.queues.contains_key(queue) {
                return Err(ConfigError::unknown_queue("source", name, queue));
            }
        }

        let selector = &source.selector;
        if selector.selector_type == SelectorType::Multiplexing
            && selector.header.as_deref().is_none_or(str::is_empty)
        {
            return Err(ConfigError::missing_field("source", name, "selector.header"));
        }
        // Selectors may only name queues the source writes to
        for queue in selector.referenced_queues() {
            if !source.queues.iter().any(|q| q == queue) {
                return Err(ConfigError::unknown_queue("source", name, queue));
            }
        }
    }

    for (port, mut sources) in ports {
        if sources.len() > 1 {
            sources.sort_unstable();
            return Err(ConfigError::duplicate_port(port, sources.join(", ")));
        }
    }

    Ok(())
}

fn validate_sinks(config: &Config) -> Result<()> {
    for (name, sink) in config.sinks.iter().filter(|(_, s)| s.enabled) {
        if sink.hostname.is_empty() {
            return Err(ConfigError::missing_field("sink", name, "hostname"));
        }
        if sink.port == 0 {
            return Err(ConfigError::missing_field("sink", name, "port"));
        }
        if sink.queue.is_empty() {
            return Err(ConfigError::missing_field("sink", name, "queue"));
        }
        let Some(queue) = config.queues.get(&sink.queue) else {
            return Err(ConfigError::unknown_queue("sink", name, &sink.queue));
        };

        if sink.batch_size == 0 {
            return Err(ConfigError::invalid_value("sink", name, "batch-size", "must be > 0"));
        }
        if sink.batch_size > queue.transaction_capacity {
            return Err(ConfigError::invalid_value(
                "sink",
                name,
                "batch-size",
                format!(
                    "must not exceed transaction-capacity ({}) of queue '{}'",
                    queue.transaction_capacity, sink.queue
                ),
            ));
        }
        if let Err(e) = sink.compression() {
            return Err(ConfigError::invalid_value(
                "sink",
                name,
                "compression-type",
                e.to_string(),
            ));
        }
        if sink.compression_level > MAX_COMPRESSION_LEVEL {
            return Err(ConfigError::invalid_value(
                "sink",
                name,
                "compression-level",
                format!("must be between 0 and {MAX_COMPRESSION_LEVEL}"),
            ));
        }
        if sink.runner.max_backoff < sink.runner.backoff_increment {
            return Err(ConfigError::invalid_value(
                "sink",
                name,
                "runner.max-backoff",
                "must be >= runner.backoff-increment",
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use crate::{Config, ConfigError};

    const BASE: &str = r#"
[queues.main]

[queues.audit]
capacity = 50
transaction-capacity = 10
"#;

    fn parse(extra: &str) -> Result<Config, ConfigError> {
        Config::from_str(&format!("{BASE}\n{extra}"))
    }

    #[test]
    fn test_no_queues() {
        assert!(matches!(Config::from_str(""), Err(ConfigError::NoQueues)));
    }

    #[test]
    fn test_queue_transaction_capacity_too_large() {
        let err = Config::from_str("[queues.q]\ncapacity = 5\ntransaction-capacity = 6").unwrap_err();
        assert!(err.to_string().contains("transaction-capacity"));
    }

    #[test]
    fn test_source_unknown_queue() {
        let err = parse("[sources.in]\nport = 4141\nqueues = [\"missing\"]").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownQueue { .. }));
    }

    #[test]
    fn test_source_without_queues() {
        let err = parse("[sources.in]\nport = 4141").unwrap_err();
        assert!(err.to_string().contains("queues"));
    }

    #[test]
    fn test_multiplexing_needs_header() {
        let toml = r#"
[sources.in]
port = 4141
queues = ["main"]
selector = { type = "multiplexing", default = ["main"] }
"#;
        let err = parse(toml).unwrap_err();
        assert!(err.to_string().contains("selector.header"));
    }

    #[test]
    fn test_selector_queue_outside_source() {
        let toml = r#"
[sources.in]
port = 4141
queues = ["main"]
selector = { optional = ["audit"] }
"#;
        let err = parse(toml).unwrap_err();
        assert!(err.to_string().contains("'audit'"));
    }

    #[test]
    fn test_duplicate_ports() {
        let toml = r#"
[sources.a]
port = 4141
queues = ["main"]

[sources.b]
port = 4141
queues = ["main"]
"#;
        let err = parse(toml).unwrap_err();
        assert_eq!(
            err.to_string(),
            "port 4141 is used by multiple sources: a, b"
        );
    }

    #[test]
    fn test_disabled_source_port_ignored() {
        let toml = r#"
[sources.a]
port = 4141
queues = ["main"]

[sources.b]
enabled = false
port = 4141
"#;
        assert!(parse(toml).is_ok());
    }

    #[test]
    fn test_sink_missing_hostname() {
        let err = parse("[sinks.out]\nport = 4141\nqueue = \"main\"").unwrap_err();
        assert!(err.to_string().contains("hostname"));
    }

    #[test]
    fn test_sink_batch_exceeds_transaction() {
        let toml = "[sinks.out]\nhostname = \"h\"\nport = 1\nqueue = \"audit\"\nbatch-size = 11";
        let err = parse(toml).unwrap_err();
        assert!(err.to_string().contains("batch-size"));
    }

    #[test]
    fn test_sink_compression_level() {
        let toml = "[sinks.out]\nhostname = \"h\"\nport = 1\nqueue = \"main\"\ncompression-level = 10";
        let err = parse(toml).unwrap_err();
        assert!(err.to_string().contains("compression-level"));
    }

    #[test]
    fn test_sink_bad_compression_type() {
        let toml = "[sinks.out]\nhostname = \"h\"\nport = 1\nqueue = \"main\"\ncompression-type = \"lz4\"";
        let err = parse(toml).unwrap_err();
        assert!(err.to_string().contains("lz4"));
    }
}
