//! Conduit - event transport agent
//!
//! # Usage
//!
//! ```bash
//! # Run the agent (default)
//! conduit
//! conduit --config configs/conduit.toml
//!
//! # Validate a configuration without starting anything
//! conduit check --config configs/conduit.toml
//! ```

mod cmd;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use conduit_config::{Config, LogConfig, LogFormat, LogOutput};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Paths tried when no `--config` is given
const DEFAULT_CONFIG_PATHS: &[&str] = &["configs/conduit.toml", "conduit.toml"];

/// Conduit - event transport agent
#[derive(Parser, Debug)]
#[command(name = "conduit")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file (error if specified but not found)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level for the conduit crates, or a full filter such as
    /// "info,conduit_sinks=debug". Overrides config file.
    #[arg(short, long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the agent
    Serve,

    /// Validate a configuration file and print its components
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let path = resolve_config_path(cli.config)?;
    let config = Config::from_file(&path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))?;

    match cli.command {
        Some(Command::Check) => {
            // Check doesn't need logging - just outputs to stdout
            cmd::check::run(&config, &path);
            Ok(())
        }
        Some(Command::Serve) | None => {
            init_logging(&config.log, cli.log_level.as_deref())?;
            cmd::serve::run(config, &path).await
        }
    }
}

/// Explicit path must exist; otherwise the first default path that does
fn resolve_config_path(explicit: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        if !path.exists() {
            anyhow::bail!("config file not found: {}", path.display());
        }
        return Ok(path);
    }

    DEFAULT_CONFIG_PATHS
        .iter()
        .map(Path::new)
        .find(|p| p.exists())
        .map(Path::to_path_buf)
        .with_context(|| {
            format!(
                "no config file given and none found at {}",
                DEFAULT_CONFIG_PATHS.join(", ")
            )
        })
}

/// Initialize the tracing subscriber
///
/// Level: CLI flag > config file > "info".
fn init_logging(log: &LogConfig, cli_level: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_new(log.filter_directive(cli_level))
        .or_else(|_| EnvFilter::try_new(LogConfig::default().filter_directive(None)))
        .map_err(|e| anyhow::anyhow!("invalid log level: {}", e))?;

    let writer = match log.output {
        LogOutput::Stdout => BoxMakeWriter::new(std::io::stdout),
        LogOutput::Stderr => BoxMakeWriter::new(std::io::stderr),
    };

    match log.format {
        LogFormat::Console => tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(writer),
            )
            .with(filter)
            .init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(writer))
            .with(filter)
            .init(),
    }

    Ok(())
}
