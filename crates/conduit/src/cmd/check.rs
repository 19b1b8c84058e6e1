//! Check command - validate a configuration file
//!
//! Loading the config already validated it; this prints what would run.

use std::path::Path;

use conduit_config::Config;

/// Print the components a validated config describes
pub fn run(config: &Config, path: &Path) {
    println!("{}: ok", path.display());

    println!("queues:");
    for (name, queue) in &config.queues {
        println!(
            "  {name}: capacity={} transaction-capacity={}",
            queue.capacity, queue.transaction_capacity
        );
    }

    println!("sources:");
    for (name, source) in &config.sources {
        println!(
            "  {name}: {}:{} -> [{}]{}",
            source.bind,
            source.port,
            source.queues.join(", "),
            disabled_suffix(source.enabled)
        );
    }

    println!("sinks:");
    for (name, sink) in &config.sinks {
        println!(
            "  {name}: {} -> {}:{} batch-size={}{}",
            sink.queue,
            sink.hostname,
            sink.port,
            sink.batch_size,
            disabled_suffix(sink.enabled)
        );
    }
}

fn disabled_suffix(enabled: bool) -> &'static str {
    if enabled { "" } else { " (disabled)" }
}
