//! # nodediag Agent
//!
//! Per-node diagnosis agent binary: loads configuration, wires the
//! collaborator drivers into the executor and processor framework, and
//! serves until Ctrl+C or SIGTERM.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use nodediag_agent::processors::builtin::{ContainerListProcessor, PodListProcessor};
use nodediag_agent::processors::ProcessorRegistry;
use nodediag_agent::server::{agent_router, serve, AgentIdentity};
use nodediag_executor::{Dispatcher, DispatcherConfig, FunctionPodManager, TaskExecutor};
use nodediag_shared::config::AgentConfig;
use nodediag_shared::events::TracingEventRecorder;
use nodediag_shared::runtime::FakeRuntime;
use nodediag_shared::store::InMemoryStore;
use nodediag_shared::{logging, metrics};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Value written to the `created-by` label on function pods.
const AGENT_IDENTITY: &str = "nodediag-agent";

const TASK_QUEUE_CAPACITY: usize = 256;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[derive(Debug, Parser)]
#[command(name = "nodediag-agent", about = "Per-node diagnosis agent")]
struct Cli {
    /// TOML configuration file; flags below override it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Identity of the node this agent serves.
    #[arg(long)]
    node_name: Option<String>,

    /// Bind address for the agent HTTP server.
    #[arg(long)]
    bind_address: Option<String>,

    /// Bind port for the agent HTTP server.
    #[arg(long)]
    port: Option<u16>,

    /// Root of the agent's on-disk trees.
    #[arg(long)]
    data_root: Option<PathBuf>,

    /// Container runtime endpoint.
    #[arg(long)]
    runtime_endpoint: Option<String>,

    /// Processor features to switch off (repeatable).
    #[arg(long = "disable-feature")]
    disable_features: Vec<String>,
}

impl Cli {
    fn apply(self, mut config: AgentConfig) -> AgentConfig {
        if let Some(node_name) = self.node_name {
            config.node_name = node_name;
        }
        if let Some(bind_address) = self.bind_address {
            config.bind_address = bind_address;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(data_root) = self.data_root {
            config.data_root = data_root;
        }
        if let Some(runtime_endpoint) = self.runtime_endpoint {
            config.runtime_endpoint = runtime_endpoint;
        }
        config.disabled_features.extend(self.disable_features);
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AgentConfig::load(cli.config.as_deref()).context("loading configuration")?;
    let config = cli.apply(config);
    logging::init_tracing(config.log_format);
    metrics::register_executor_metrics();

    anyhow::ensure!(
        !config.node_name.is_empty(),
        "node name is required (--node-name or NODEDIAG_NODE_NAME)"
    );

    info!(
        node = %config.node_name,
        bind = %config.bind_address,
        port = config.port,
        data_root = %config.data_root.display(),
        "starting nodediag agent v{}",
        env!("CARGO_PKG_VERSION")
    );

    // Collaborator drivers. The in-tree store and runtime serve standalone
    // deployments; cluster drivers are wired here instead when present.
    let store = Arc::new(InMemoryStore::new());
    let runtime = Arc::new(FakeRuntime::new());
    let events = Arc::new(TracingEventRecorder);

    let pods = Arc::new(FunctionPodManager::new(
        store.clone(),
        runtime.clone(),
        config.node_name.clone(),
        AGENT_IDENTITY,
    ));
    let dispatcher = Arc::new(
        Dispatcher::new(
            DispatcherConfig {
                agent_address: config.bind_address.clone(),
                agent_port: config.port,
                scripts_dir: config.scripts_dir(),
            },
            pods,
        )
        .context("building dispatcher")?,
    );

    let (executor, _task_queue) = TaskExecutor::new(
        config.node_name.clone(),
        store.clone(),
        events,
        dispatcher,
        TASK_QUEUE_CAPACITY,
    );

    let mut registry = ProcessorRegistry::new(config.feature_gate());
    registry
        .register(Arc::new(ContainerListProcessor::new(runtime)))
        .register(Arc::new(PodListProcessor::new(store)));

    let router = agent_router(
        AgentIdentity {
            node_name: config.node_name.clone(),
            version: env!("CARGO_PKG_VERSION"),
        },
        registry,
    );

    let addr: SocketAddr = format!("{}:{}", config.bind_address, config.port)
        .parse()
        .context("parsing bind address")?;

    let shutdown = CancellationToken::new();
    let executor_handle = tokio::spawn(executor.run(shutdown.clone()));
    let server_handle = tokio::spawn(serve(addr, router, shutdown.clone()));

    shutdown_signal().await;
    info!("shutdown signal received, draining");
    shutdown.cancel();

    if tokio::time::timeout(SHUTDOWN_GRACE, async {
        if let Err(err) = executor_handle.await {
            error!(%err, "executor task panicked");
        }
        match server_handle.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => error!(%err, "server exited with error"),
            Err(err) => error!(%err, "server task panicked"),
        }
    })
    .await
    .is_err()
    {
        error!(grace_secs = SHUTDOWN_GRACE.as_secs(), "graceful shutdown timed out");
    }

    info!("nodediag agent stopped");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C"),
        _ = terminate => info!("received SIGTERM"),
    }
}
