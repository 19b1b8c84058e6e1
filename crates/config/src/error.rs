//! Configuration error types

use std::io;
use thiserror::Error;

/// Result type for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors that can occur when loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file
    #[error("failed to read config file '{path}': {source}")]
    IoError {
        /// Path to the file
        path: String,
        /// Underlying IO error
        #[source]
        source: io::Error,
    },

    /// Failed to parse TOML
    #[error("failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Validation error - a component names a queue that is not configured
    #[error("{component} '{name}' references unknown queue '{queue}'")]
    UnknownQueue {
        /// Component type (e.g., "sink", "source")
        component: &'static str,
        /// Name of the component
        name: String,
        /// Name of the missing queue
        queue: String,
    },

    /// Validation error - duplicate port
    #[error("port {port} is used by multiple sources: {sources}")]
    DuplicatePort {
        /// The conflicting port
        port: u16,
        /// Sources using this port
        sources: String,
    },

    /// Validation error - required field missing
    #[error("{component} '{name}' is missing required field '{field}'")]
    MissingField {
        /// Component type (e.g., "sink", "source")
        component: &'static str,
        /// Name of the component
        name: String,
        /// Missing field name
        field: &'static str,
    },

    /// Validation error - invalid value
    #[error("{component} '{name}' has invalid {field}: {message}")]
    InvalidValue {
        /// Component type
        component: &'static str,
        /// Name of the component
        name: String,
        /// Field name
        field: &'static str,
        /// Error message
        message: String,
    },

    /// No queues configured
    #[error("no queues are configured - at least one queue must be defined")]
    NoQueues,
}

impl ConfigError {
    /// Create an UnknownQueue error
    pub fn unknown_queue(
        component: &'static str,
        name: impl Into<String>,
        queue: impl Into<String>,
    ) -> Self {
        Self::UnknownQueue {
            component,
            name: name.into(),
            queue: queue.into(),
        }
    }

    /// Create a DuplicatePort error
    pub fn duplicate_port(port: u16, sources: impl Into<String>) -> Self {
        Self::DuplicatePort {
            port,
            sources: sources.into(),
        }
    }

    /// Create a MissingField error
    pub fn missing_field(
        component: &'static str,
        name: impl Into<String>,
        field: &'static str,
    ) -> Self {
        Self::MissingField {
            component,
            name: name.into(),
            field,
        }
    }

    /// Create an InvalidValue error
    pub fn invalid_value(
        component: &'static str,
        name: impl Into<String>,
        field: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            component,
            name: name.into(),
            field,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_queue_error() {
        let err = ConfigError::unknown_queue("sink", "upstream", "spool");
        assert_eq!(
            err.to_string(),
            "sink 'upstream' references unknown queue 'spool'"
        );
    }

    #[test]
    fn test_duplicate_port_error() {
        let err = ConfigError::duplicate_port(4141, "ingest, backup");
        assert!(err.to_string().contains("4141"));
        assert!(err.to_string().contains("ingest, backup"));
    }

    #[test]
    fn test_missing_field_error() {
        let err = ConfigError::missing_field("sink", "upstream", "hostname");
        assert!(err.to_string().contains("sink"));
        assert!(err.to_string().contains("upstream"));
        assert!(err.to_string().contains("hostname"));
    }

    #[test]
    fn test_invalid_value_error() {
        let err = ConfigError::invalid_value(
            "sink",
            "upstream",
            "compression-level",
            "must be between 0 and 9",
        );
        assert!(err.to_string().contains("upstream"));
        assert!(err.to_string().contains("compression-level"));
    }

    #[test]
    fn test_no_queues() {
        assert!(ConfigError::NoQueues.to_string().contains("no queues"));
    }
}
