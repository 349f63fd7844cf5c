//! CLI argument parsing using clap

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Execution mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExecutionMode {
    /// Coordinator mode (default) - HTTP API, fans queries out to workers
    Coordinator,
    /// Worker mode - answers tasks over HTTP or from the message bus
    Worker,
    /// Broker mode - TCP publish/subscribe hub for the bus topology
    Broker,
    /// Demo mode - submits sample queries to a running coordinator
    Demo,
}

/// Topology selection on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TopologyArg {
    Direct,
    Bus,
}

/// Aggregation strategy on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StrategyArg {
    Average,
    Median,
    Majority,
}

/// oraclenet - oracle network coordinator and workers
#[derive(Parser, Debug)]
#[command(name = "oraclenet")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Execution mode: coordinator, worker, broker, or demo
    #[arg(long, value_enum, default_value = "coordinator")]
    pub mode: ExecutionMode,

    /// TOML configuration file
    #[arg(short = 'c', long, env = "ORACLENET_CONFIG")]
    pub config: Option<PathBuf>,

    /// Listen port (coordinator API or worker task server, by mode)
    #[arg(short = 'p', long)]
    pub port: Option<u16>,

    /// Worker topology: direct (registry + HTTP) or bus (publish/subscribe)
    #[arg(long, value_enum)]
    pub topology: Option<TopologyArg>,

    /// Aggregation strategy
    #[arg(long, value_enum)]
    pub strategy: Option<StrategyArg>,

    /// Collection window per round (e.g., 3s, 500ms)
    #[arg(long)]
    pub round_timeout: Option<String>,

    /// Append explicit timeout outcomes for silent workers (direct topology)
    #[arg(long)]
    pub synthesize_timeouts: bool,

    /// Coordinator base URL (worker and demo modes)
    #[arg(long, env = "ORACLENET_COORDINATOR_URL")]
    pub coordinator_url: Option<String>,

    /// Message broker address (bus topology and broker mode)
    #[arg(long, env = "ORACLENET_BUS_ADDRESS")]
    pub bus_address: Option<String>,

    /// Worker id (generated when omitted)
    #[arg(long)]
    pub worker_id: Option<String>,

    /// Endpoint the worker announces at registration
    #[arg(long)]
    pub advertise_url: Option<String>,

    /// Skip registration with the coordinator (worker mode)
    #[arg(long)]
    pub no_register: bool,

    /// Simulated failure probability (worker mode)
    #[arg(long)]
    pub failure_rate: Option<f64>,

    /// Report outcomes as unreliable (worker mode)
    #[arg(long)]
    pub unreliable: bool,

    /// Seed for the worker value simulator
    #[arg(long)]
    pub seed: Option<u64>,

    /// Comma-separated queries for demo mode (e.g., "BTC/USD,ETH/USD")
    #[arg(long, value_delimiter = ',')]
    pub queries: Option<Vec<String>>,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,
}
