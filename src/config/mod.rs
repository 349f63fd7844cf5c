//! Configuration module
//!
//! Handles CLI argument parsing, TOML configuration files, and validation.
//!
//! Precedence: built-in defaults, then the TOML file (`--config`), then CLI
//! flags. Every section is optional in the file.

pub mod cli;
pub mod toml;
pub mod validator;

use crate::bus::Subjects;
use crate::stats::aggregator::AggregationStrategy;
use crate::worker::simulator::SimulatorSettings;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Complete node configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

/// How the coordinator reaches workers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopologyKind {
    /// Registry of HTTP workers, one call per worker per round
    #[default]
    Direct,
    /// One publish per round on a message bus, replies correlated by request id
    Bus,
}

impl TopologyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TopologyKind::Direct => "direct",
            TopologyKind::Bus => "bus",
        }
    }
}

impl fmt::Display for TopologyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coordinator settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// HTTP API port
    #[serde(default = "default_coordinator_port")]
    pub port: u16,
    #[serde(default)]
    pub topology: TopologyKind,
    #[serde(default)]
    pub strategy: AggregationStrategy,
    /// Collection window per round
    #[serde(default = "default_round_timeout_ms")]
    pub round_timeout_ms: u64,
    /// Caller deadline applied to each `/request`
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Per-call timeout of the HTTP worker client
    #[serde(default = "default_worker_call_timeout_ms")]
    pub worker_call_timeout_ms: u64,
    /// Emit explicit `timeout` outcomes for silent workers (direct topology)
    #[serde(default)]
    pub synthesize_timeouts: bool,
    #[serde(default = "default_stale_threshold_ms")]
    pub stale_threshold_ms: u64,
    #[serde(default = "default_eviction_interval_ms")]
    pub eviction_interval_ms: u64,
}

fn default_coordinator_port() -> u16 {
    8080
}

fn default_round_timeout_ms() -> u64 {
    3000
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_worker_call_timeout_ms() -> u64 {
    5000
}

fn default_stale_threshold_ms() -> u64 {
    60_000
}

fn default_eviction_interval_ms() -> u64 {
    30_000
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            port: default_coordinator_port(),
            topology: TopologyKind::default(),
            strategy: AggregationStrategy::default(),
            round_timeout_ms: default_round_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            worker_call_timeout_ms: default_worker_call_timeout_ms(),
            synthesize_timeouts: false,
            stale_threshold_ms: default_stale_threshold_ms(),
            eviction_interval_ms: default_eviction_interval_ms(),
        }
    }
}

impl CoordinatorConfig {
    pub fn round_timeout(&self) -> Duration {
        Duration::from_millis(self.round_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn worker_call_timeout(&self) -> Duration {
        Duration::from_millis(self.worker_call_timeout_ms)
    }

    pub fn stale_threshold(&self) -> Duration {
        Duration::from_millis(self.stale_threshold_ms)
    }

    pub fn eviction_interval(&self) -> Duration {
        Duration::from_millis(self.eviction_interval_ms)
    }
}

/// Worker node settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Generated (`worker-xxxxxxxx`) when absent
    pub id: Option<String>,
    #[serde(default = "default_worker_port")]
    pub port: u16,
    #[serde(default)]
    pub topology: TopologyKind,
    #[serde(default = "default_coordinator_url")]
    pub coordinator_url: String,
    /// Endpoint announced at registration; `http://localhost:<port>` when absent
    pub advertise_url: Option<String>,
    /// Register with the coordinator on startup (direct topology)
    #[serde(default = "default_true")]
    pub register: bool,
    #[serde(default = "default_registration_attempts")]
    pub registration_attempts: u32,
    #[serde(default = "default_registration_interval_ms")]
    pub registration_interval_ms: u64,
    /// Re-registration period that keeps the record fresh
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Probability in [0, 1] that a task fails
    #[serde(default = "default_failure_rate")]
    pub failure_rate: f64,
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Relative value spread; 0.05 means ±5%
    #[serde(default = "default_variance")]
    pub variance: f64,
    /// Seed for a reproducible simulator
    pub seed: Option<u64>,
    /// Reliability flag the node reports on its outcomes and health
    #[serde(default = "default_true")]
    pub reliable: bool,
}

fn default_worker_port() -> u16 {
    8081
}

fn default_coordinator_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_true() -> bool {
    true
}

fn default_registration_attempts() -> u32 {
    3
}

fn default_registration_interval_ms() -> u64 {
    1000
}

fn default_heartbeat_interval_ms() -> u64 {
    20_000
}

fn default_failure_rate() -> f64 {
    0.1
}

fn default_min_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    2000
}

fn default_variance() -> f64 {
    0.05
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            id: None,
            port: default_worker_port(),
            topology: TopologyKind::default(),
            coordinator_url: default_coordinator_url(),
            advertise_url: None,
            register: true,
            registration_attempts: default_registration_attempts(),
            registration_interval_ms: default_registration_interval_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            failure_rate: default_failure_rate(),
            min_delay_ms: default_min_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            variance: default_variance(),
            seed: None,
            reliable: true,
        }
    }
}

impl WorkerConfig {
    pub fn endpoint(&self) -> String {
        match &self.advertise_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("http://localhost:{}", self.port),
        }
    }

    pub fn registration_interval(&self) -> Duration {
        Duration::from_millis(self.registration_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn simulator_settings(&self) -> SimulatorSettings {
        SimulatorSettings {
            failure_rate: self.failure_rate,
            min_delay: Duration::from_millis(self.min_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            variance: self.variance,
        }
    }
}

/// Message bus settings (bus topology)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusConfig {
    /// Broker address; the broker listens here, clients connect here
    #[serde(default = "default_bus_address")]
    pub address: String,
    #[serde(default = "default_task_subject")]
    pub task_subject: String,
    #[serde(default = "default_result_subject")]
    pub result_subject: String,
}

fn default_bus_address() -> String {
    "127.0.0.1:4222".to_string()
}

fn default_task_subject() -> String {
    Subjects::default().tasks
}

fn default_result_subject() -> String {
    Subjects::default().results
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            address: default_bus_address(),
            task_subject: default_task_subject(),
            result_subject: default_result_subject(),
        }
    }
}

impl BusConfig {
    pub fn subjects(&self) -> Subjects {
        Subjects {
            tasks: self.task_subject.clone(),
            results: self.result_subject.clone(),
        }
    }
}

/// Runtime configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Enable debug output
    #[serde(default)]
    pub debug: bool,
    /// Queries submitted by `--mode demo`
    #[serde(default = "default_demo_queries")]
    pub demo_queries: Vec<String>,
    /// Pause before the demo submits, giving workers time to register
    #[serde(default = "default_demo_wait_ms")]
    pub demo_wait_ms: u64,
}

fn default_demo_queries() -> Vec<String> {
    ["BTC/USD", "ETH/USD", "SOL/USD", "MATIC/USD", "BTC/USD"]
        .iter()
        .map(|q| q.to_string())
        .collect()
}

fn default_demo_wait_ms() -> u64 {
    2000
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            debug: false,
            demo_queries: default_demo_queries(),
            demo_wait_ms: default_demo_wait_ms(),
        }
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Configuration:")?;
        writeln!(
            f,
            "  Coordinator: port {}, {} topology, {} strategy, round timeout {}ms",
            self.coordinator.port,
            self.coordinator.topology,
            self.coordinator.strategy,
            self.coordinator.round_timeout_ms
        )?;
        writeln!(
            f,
            "  Worker: port {}, {} topology, coordinator {}",
            self.worker.port, self.worker.topology, self.worker.coordinator_url
        )?;
        write!(
            f,
            "  Bus: {} (tasks: {}, results: {})",
            self.bus.address, self.bus.task_subject, self.bus.result_subject
        )
    }
}
