//! OracleNet CLI entry point

use anyhow::{Context, Result};
use clap::Parser;
use oraclenet::api::{self, AppState};
use oraclenet::bus::MessageBus;
use oraclenet::config::cli::{Cli, ExecutionMode};
use oraclenet::config::{validator, Config, TopologyKind};
use oraclenet::dispatch::Dispatcher;
use oraclenet::distributed::{Broker, NodeService, OracleCoordinator, RoundSettings, TcpBus};
use oraclenet::registry::WorkerRegistry;
use oraclenet::worker::HttpWorkerProxy;
use std::sync::Arc;
use tokio::net::TcpListener;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = oraclenet::config::toml::load_config(&cli)?;
    init_logging(config.runtime.debug);

    validator::validate_config(&config).context("Configuration validation failed")?;

    println!("OracleNet v{}", env!("CARGO_PKG_VERSION"));
    if config.runtime.debug {
        println!("{}", config);
    }
    println!();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    runtime.block_on(async {
        match cli.mode {
            ExecutionMode::Coordinator => run_coordinator(config).await,
            ExecutionMode::Worker => run_worker(config).await,
            ExecutionMode::Broker => run_broker(config).await,
            ExecutionMode::Demo => oraclenet::client::run_demo(&config).await,
        }
    })
}

/// `RUST_LOG` wins; otherwise info, or debug with `--debug`
fn init_logging(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_millis()
        .init();
}

async fn run_coordinator(config: Config) -> Result<()> {
    let settings = RoundSettings {
        round_timeout: config.coordinator.round_timeout(),
        strategy: config.coordinator.strategy,
    };

    let mut eviction = None;
    let coordinator = match config.coordinator.topology {
        TopologyKind::Direct => {
            let registry = Arc::new(WorkerRegistry::new());
            eviction = Some(WorkerRegistry::spawn_eviction(
                Arc::clone(&registry),
                config.coordinator.eviction_interval(),
                config.coordinator.stale_threshold(),
            ));

            let proxy = HttpWorkerProxy::new(config.coordinator.worker_call_timeout())?;
            let dispatcher = Dispatcher::new(Arc::new(proxy))
                .with_timeout_synthesis(config.coordinator.synthesize_timeouts);
            OracleCoordinator::direct(registry, dispatcher, settings)
        }
        TopologyKind::Bus => {
            let bus: Arc<dyn MessageBus> = Arc::new(TcpBus::connect(&config.bus.address, "coordinator").await?);
            OracleCoordinator::bus(bus, config.bus.subjects(), settings).await?
        }
    };

    let addr = format!("0.0.0.0:{}", config.coordinator.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind coordinator API on {}", addr))?;

    println!("🚀 Coordinator listening on port {}", config.coordinator.port);
    println!(
        "Topology: {}, strategy: {}, round timeout: {}ms",
        coordinator.topology_name(),
        config.coordinator.strategy,
        config.coordinator.round_timeout_ms
    );

    let state = AppState {
        coordinator: Arc::new(coordinator),
        port: config.coordinator.port,
        request_timeout: config.coordinator.request_timeout(),
    };
    let result = api::serve(listener, state).await;

    if let Some(handle) = eviction {
        handle.abort();
    }
    result
}

async fn run_worker(config: Config) -> Result<()> {
    let node = Arc::new(NodeService::from_config(&config.worker));

    match config.worker.topology {
        TopologyKind::Direct => node.run_http(&config.worker).await,
        TopologyKind::Bus => {
            let bus: Arc<dyn MessageBus> = Arc::new(TcpBus::connect(&config.bus.address, node.worker_id()).await?);
            node.run_bus(bus, config.bus.subjects()).await
        }
    }
}

async fn run_broker(config: Config) -> Result<()> {
    let broker = Broker::bind(&config.bus.address).await?;
    println!("📡 Broker listening on {}", broker.local_addr()?);
    broker.run().await
}
