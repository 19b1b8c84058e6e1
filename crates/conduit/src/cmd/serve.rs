//! Serve command - run the Conduit agent
//!
//! Wires the configured components together:
//!
//! ```text
//! RpcSource ──ChannelProcessor──→ MemoryQueue(s) ──→ SinkRunner(RpcSink) ──→ remote
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use conduit_config::{Config, SelectorType, SinkConfig, SourceConfig};
use conduit_pipeline::{ChannelProcessor, MemoryQueue};
use conduit_routing::{ChannelSelector, SelectorBuilder};
use conduit_sinks::{CountersSnapshot, RpcSink, RpcSinkConfig, RunnerConfig, SinkRunner};
use conduit_sources::{ProcessorResponder, RpcSource, RpcSourceConfig};

/// Time each sink runner gets to finish its current call on shutdown
const SINK_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Run the serve command
pub async fn run(config: Config, path: &Path) -> Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        platform = std::env::consts::OS,
        arch = std::env::consts::ARCH,
        config = %path.display(),
        "Conduit starting"
    );

    let agent = Agent::build(&config).context("failed to build components")?;
    let running = agent.start().await?;

    info!(
        queue_count = config.queues.len(),
        source_count = running.sources.len(),
        sink_count = running.sinks.len(),
        "Conduit running"
    );

    wait_for_shutdown().await;
    info!("shutdown signal received, stopping agent...");

    running.shutdown().await;
    info!("Conduit shutdown complete");
    Ok(())
}

/// Components built from a config, not yet started
pub(crate) struct Agent {
    queues: BTreeMap<String, Arc<MemoryQueue>>,
    sources: Vec<RpcSource>,
    runners: Vec<SinkRunner>,
}

impl Agent {
    /// Build queues, sources and sinks for every enabled component
    pub(crate) fn build(config: &Config) -> Result<Self> {
        let queues = build_queues(config)?;

        let sources = config
            .enabled_sources()
            .map(|(name, source)| build_source(name, source, &queues))
            .collect::<Result<Vec<_>>>()?;

        let runners = config
            .enabled_sinks()
            .map(|(name, sink)| build_sink(name, sink, &queues))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            queues,
            sources,
            runners,
        })
    }

    /// Start every source, then spawn one runner task per sink
    ///
    /// If a source fails to bind, the ones already started are stopped.
    pub(crate) async fn start(self) -> Result<RunningAgent> {
        let Agent {
            queues,
            sources,
            runners,
        } = self;

        let mut started = Vec::with_capacity(sources.len());
        for mut source in sources {
            match source.start().await {
                Ok(addr) => {
                    info!(source = %source.name(), address = %addr, "source listening");
                    started.push(source);
                }
                Err(e) => {
                    let name = source.name().to_string();
                    for mut source in started {
                        if let Err(e) = source.stop().await {
                            warn!(
                                source = %source.name(),
                                error = %e,
                                "source did not stop cleanly"
                            );
                        }
                    }
                    return Err(e).with_context(|| format!("failed to start source '{name}'"));
                }
            }
        }

        let cancel = CancellationToken::new();
        let sinks = runners
            .into_iter()
            .map(|runner| {
                let name = runner.sink().name().to_string();
                info!(
                    sink = %name,
                    endpoint = %runner.sink().config().target(),
                    batch_size = runner.sink().config().batch_size,
                    "sink started"
                );
                (name, tokio::spawn(runner.run(cancel.child_token())))
            })
            .collect();

        Ok(RunningAgent {
            queues,
            sources: started,
            sinks,
            cancel,
        })
    }
}

/// A started agent
pub(crate) struct RunningAgent {
    queues: BTreeMap<String, Arc<MemoryQueue>>,
    sources: Vec<RpcSource>,
    sinks: Vec<(String, JoinHandle<CountersSnapshot>)>,
    cancel: CancellationToken,
}

impl RunningAgent {
    /// Bound address of a started source
    #[cfg(test)]
    pub(crate) fn source_addr(&self, name: &str) -> Option<std::net::SocketAddr> {
        self.sources
            .iter()
            .find(|s| s.name() == name)
            .and_then(RpcSource::local_addr)
    }

    #[cfg(test)]
    pub(crate) fn queue(&self, name: &str) -> Option<&Arc<MemoryQueue>> {
        self.queues.get(name)
    }

    /// Stop sources first so no new events arrive, then the sinks
    pub(crate) async fn shutdown(self) {
        for mut source in self.sources {
            if let Err(e) = source.stop().await {
                warn!(source = %source.name(), error = %e, "source did not stop cleanly");
            }
        }

        self.cancel.cancel();
        for (name, task) in self.sinks {
            match tokio::time::timeout(SINK_SHUTDOWN_TIMEOUT, task).await {
                Ok(Ok(counters)) => {
                    info!(
                        sink = %name,
                        delivered = counters.event_drain_success,
                        attempted = counters.event_drain_attempt,
                        "sink stopped"
                    );
                }
                Ok(Err(e)) => error!(sink = %name, error = %e, "sink task panicked"),
                Err(_) => warn!(sink = %name, "sink did not stop within timeout"),
            }
        }

        for (name, queue) in &self.queues {
            if !queue.is_empty() {
                warn!(queue = %name, events = queue.len(), "events left in queue at shutdown");
            }
        }
    }
}

/// Create one shared queue per configured queue
fn build_queues(config: &Config) -> Result<BTreeMap<String, Arc<MemoryQueue>>> {
    config
        .queues
        .iter()
        .map(|(name, queue)| {
            let q = MemoryQueue::new(name.as_str(), queue.capacity, queue.transaction_capacity)
                .with_context(|| format!("invalid queue '{name}'"))?;
            Ok((name.clone(), Arc::new(q)))
        })
        .collect()
}

fn build_source(
    name: &str,
    source: &SourceConfig,
    queues: &BTreeMap<String, Arc<MemoryQueue>>,
) -> Result<RpcSource> {
    let mut builder = SelectorBuilder::new();
    for queue in &source.queues {
        builder
            .register_queue(queue.as_str())
            .with_context(|| format!("source '{name}'"))?;
    }
    let selector =
        build_selector(&builder, source).with_context(|| format!("source '{name}' selector"))?;

    // Processor queue order must follow QueueId registration order
    let attached = builder
        .queue_names()
        .iter()
        .map(|queue| {
            queues
                .get(queue)
                .cloned()
                .with_context(|| format!("source '{name}' references unknown queue '{queue}'"))
        })
        .collect::<Result<Vec<_>>>()?;

    let processor = ChannelProcessor::new(selector, attached)
        .with_context(|| format!("source '{name}' processor"))?;
    let responder = Arc::new(ProcessorResponder::new(Arc::new(processor)));

    let config = RpcSourceConfig::with_port(source.port)
        .with_bind(source.bind.as_str())
        .with_threads(source.threads)
        .with_compression(source.compression()?)
        .with_shutdown_grace(source.shutdown_grace());

    RpcSource::new(name, config, responder).with_context(|| format!("source '{name}'"))
}

fn build_selector(builder: &SelectorBuilder, source: &SourceConfig) -> Result<ChannelSelector> {
    let selector = &source.selector;
    let built = match selector.selector_type {
        SelectorType::Replicating => {
            builder.replicating(source.queues.as_slice(), selector.optional.as_slice())?
        }
        SelectorType::Multiplexing => {
            let header = selector
                .header
                .as_deref()
                .context("multiplexing selector needs a header")?;
            builder.multiplexing(
                header,
                &selector.mapping,
                &selector.optional_mapping,
                selector.default.as_slice(),
            )?
        }
    };
    Ok(built)
}

fn build_sink(
    name: &str,
    sink: &SinkConfig,
    queues: &BTreeMap<String, Arc<MemoryQueue>>,
) -> Result<SinkRunner> {
    let queue = queues
        .get(&sink.queue)
        .cloned()
        .with_context(|| format!("sink '{name}' references unknown queue '{}'", sink.queue))?;

    let config = RpcSinkConfig::new(sink.hostname.as_str(), sink.port)
        .with_batch_size(sink.batch_size)
        .with_connect_timeout(sink.connect_timeout())
        .with_request_timeout(sink.request_timeout())
        .with_compression(sink.compression()?)
        .with_compression_level(sink.compression_level)
        .with_reset_connection_interval(sink.reset_connection_interval());

    let runner = RunnerConfig {
        backoff_increment: sink.runner.backoff_increment(),
        max_backoff: sink.runner.max_backoff(),
    };

    let rpc = RpcSink::new(name, config, queue).with_context(|| format!("sink '{name}'"))?;
    Ok(SinkRunner::new(rpc, runner))
}

/// Wait for Ctrl+C or SIGTERM
async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use conduit_pipeline::LifecycleState;
    use conduit_protocol::Event;
    use conduit_sinks::TransportStatus;

    use super::*;

    fn drain(queue: &MemoryQueue) -> Vec<Event> {
        let mut tx = queue.transaction();
        let mut events = Vec::new();
        while let Some(event) = tx.take().unwrap() {
            events.push(event);
        }
        tx.commit().unwrap();
        events
    }

    async fn wait_for_len(queue: &MemoryQueue, len: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while queue.len() < len {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("queue never filled");
    }

    // =========================================================================
    // Build
    // =========================================================================

    #[test]
    fn test_build_skips_disabled_components() {
        let toml = r#"
[queues.main]

[sources.on]
bind = "127.0.0.1"
queues = ["main"]

[sources.off]
enabled = false

[sinks.off]
enabled = false
"#;
        let agent = Agent::build(&Config::from_str(toml).unwrap()).unwrap();
        assert_eq!(agent.queues.len(), 1);
        assert_eq!(agent.sources.len(), 1);
        assert_eq!(agent.sources[0].name(), "on");
        assert!(agent.runners.is_empty());
    }

    #[test]
    fn test_build_sink_maps_settings() {
        let toml = r#"
[queues.main]
capacity = 100
transaction-capacity = 20

[sinks.out]
hostname = "127.0.0.1"
port = 4141
queue = "main"
batch-size = 20
compression-type = "deflate"
compression-level = 3
request-timeout = 1500
reset-connection-interval = 60000
"#;
        let agent = Agent::build(&Config::from_str(toml).unwrap()).unwrap();
        let sink = agent.runners[0].sink();
        assert_eq!(sink.name(), "out");
        assert_eq!(sink.config().batch_size, 20);
        assert_eq!(sink.config().compression_level, 3);
        assert_eq!(sink.config().request_timeout, Duration::from_millis(1500));
        assert_eq!(
            sink.config().reset_connection_interval,
            Some(Duration::from_secs(60))
        );
        assert_eq!(sink.lifecycle_state(), LifecycleState::Idle);
    }

    #[tokio::test]
    async fn test_start_fails_when_port_taken() {
        let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();
        let toml = format!(
            "[queues.main]\n[sources.in]\nbind = \"127.0.0.1\"\nport = {port}\nqueues = [\"main\"]"
        );
        let agent = Agent::build(&Config::from_str(&toml).unwrap()).unwrap();
        let err = agent.start().await.err().unwrap();
        assert!(err.to_string().contains("failed to start source 'in'"));
    }

    // =========================================================================
    // Relay
    // =========================================================================

    /// client sink → agent source → relay queue → agent sink → collector
    #[tokio::test]
    async fn test_agent_relays_events() {
        let collected = Arc::new(MemoryQueue::new("collected", 100, 100).unwrap());
        let mut builder = SelectorBuilder::new();
        builder.register_queue("collected").unwrap();
        let selector = builder.replicating(&["collected"], &[] as &[&str]).unwrap();
        let processor = ChannelProcessor::new(selector, vec![collected.clone()]).unwrap();
        let mut collector = RpcSource::new(
            "collector",
            RpcSourceConfig::with_port(0)
                .with_bind("127.0.0.1")
                .with_compression(conduit_protocol::CompressionType::Deflate),
            Arc::new(ProcessorResponder::new(Arc::new(processor))),
        )
        .unwrap();
        let collector_addr = collector.start().await.unwrap();

        let toml = format!(
            r#"
[queues.relay]

[sources.ingest]
bind = "127.0.0.1"
queues = ["relay"]

[sinks.forward]
hostname = "127.0.0.1"
port = {port}
queue = "relay"
batch-size = 4
compression-type = "deflate"

[sinks.forward.runner]
backoff-increment = 20
max-backoff = 50
"#,
            port = collector_addr.port()
        );
        let agent = Agent::build(&Config::from_str(&toml).unwrap()).unwrap();
        let running = agent.start().await.unwrap();
        let ingest = running.source_addr("ingest").unwrap();

        let client_queue = Arc::new(MemoryQueue::new("client", 10, 10).unwrap());
        {
            let mut tx = client_queue.transaction();
            for i in 0..10 {
                tx.put(Event::with_body(format!("event-{i}")).with_header("seq", i.to_string()))
                    .unwrap();
            }
            tx.commit().unwrap();
        }
        let mut client = RpcSink::new(
            "client",
            RpcSinkConfig::new("127.0.0.1", ingest.port()).with_batch_size(10),
            client_queue.clone(),
        )
        .unwrap();
        client.start().unwrap();
        assert_eq!(client.process().await.unwrap(), TransportStatus::Ready);

        wait_for_len(&collected, 10).await;
        let events = drain(&collected);
        let bodies: Vec<_> = events.iter().map(|e| e.body().clone()).collect();
        let expected: Vec<_> = (0..10).map(|i| format!("event-{i}").into_bytes()).collect();
        assert_eq!(bodies, expected);
        assert_eq!(events[3].header("seq"), Some("3"));
        assert_eq!(running.queue("relay").unwrap().len(), 0);

        client.stop().unwrap();
        running.shutdown().await;
        collector.stop().await.unwrap();
    }
}
