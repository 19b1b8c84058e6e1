//! `[log]` section
//!
//! The level applies to the conduit crates only; dependencies (tokio,
//! socket plumbing) stay at `warn` unless a full filter is given.

use serde::Deserialize;

/// Crates whose events the configured level controls
const CONDUIT_TARGETS: &[&str] = &[
    "conduit",
    "conduit_config",
    "conduit_pipeline",
    "conduit_protocol",
    "conduit_routing",
    "conduit_sinks",
    "conduit_sources",
];

/// Level for everything outside [`CONDUIT_TARGETS`]
const DEPENDENCY_LEVEL: &str = "warn";

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Per-event traces from the sink and source hot paths
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Console,
    /// One JSON object per line
    Json,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
}

/// Agent logging
///
/// ```toml
/// [log]
/// level = "debug"
/// format = "json"
/// output = "stderr"
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: LogLevel,
    pub format: LogFormat,
    pub output: LogOutput,
}

impl LogConfig {
    /// `EnvFilter` directive for this config
    ///
    /// `cli_level` overrides the configured level. A value that already
    /// holds directives (`,` or `=`) is used untouched.
    pub fn filter_directive(&self, cli_level: Option<&str>) -> String {
        let level = match cli_level {
            Some(raw) if raw.contains([',', '=']) => return raw.to_string(),
            Some(level) => level,
            None => self.level.as_str(),
        };

        let mut directive = String::from(DEPENDENCY_LEVEL);
        for target in CONDUIT_TARGETS {
            directive.push(',');
            directive.push_str(target);
            directive.push('=');
            directive.push_str(level);
        }
        directive
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_section() {
        let config: LogConfig = toml::from_str(
            r#"
level = "debug"
format = "json"
output = "stderr"
"#,
        )
        .unwrap();
        assert_eq!(config.level, LogLevel::Debug);
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.output, LogOutput::Stderr);

        assert!(toml::from_str::<LogConfig>("level = \"loud\"").is_err());
    }

    #[test]
    fn test_filter_scopes_level_to_conduit_crates() {
        let config = LogConfig::default();
        let directive = config.filter_directive(None);
        assert!(directive.starts_with("warn,"));
        assert!(directive.contains("conduit_sinks=info"));
        assert!(directive.contains("conduit=info"));

        let directive = config.filter_directive(Some("trace"));
        assert!(directive.contains("conduit_sources=trace"));
        assert!(!directive.contains("=info"));
    }

    #[test]
    fn test_filter_passes_full_directives_through() {
        let config = LogConfig::default();
        assert_eq!(
            config.filter_directive(Some("conduit_sinks=debug")),
            "conduit_sinks=debug"
        );
        assert_eq!(config.filter_directive(Some("info,tokio=debug")), "info,tokio=debug");
    }
}
