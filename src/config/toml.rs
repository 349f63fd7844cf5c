//! TOML configuration file parsing

use super::*;
use crate::config::cli::{Cli, ExecutionMode, StrategyArg, TopologyArg};
use crate::util::time::parse_duration;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Parse TOML configuration file
pub fn parse_toml_file(path: &Path) -> Result<Config> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_toml_string(&contents)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Parse TOML configuration from string
pub fn parse_toml_string(contents: &str) -> Result<Config> {
    let config: Config = ::toml::from_str(contents)
        .context("Failed to parse TOML configuration")?;

    Ok(config)
}

/// Build the effective configuration: file (if any) then CLI overrides
pub fn load_config(cli: &Cli) -> Result<Config> {
    let config = match &cli.config {
        Some(path) => parse_toml_file(path)?,
        None => Config::default(),
    };

    merge_cli_with_config(cli, config)
}

/// Merge CLI arguments with TOML configuration (CLI takes precedence)
pub fn merge_cli_with_config(cli: &Cli, mut config: Config) -> Result<Config> {
    // --port applies to whichever server this mode runs
    if let Some(port) = cli.port {
        match cli.mode {
            ExecutionMode::Worker => config.worker.port = port,
            _ => config.coordinator.port = port,
        }
    }

    if let Some(topology) = cli.topology {
        let topology = match topology {
            TopologyArg::Direct => TopologyKind::Direct,
            TopologyArg::Bus => TopologyKind::Bus,
        };
        config.coordinator.topology = topology;
        config.worker.topology = topology;
    }

    if let Some(strategy) = cli.strategy {
        config.coordinator.strategy = match strategy {
            StrategyArg::Average => AggregationStrategy::Average,
            StrategyArg::Median => AggregationStrategy::Median,
            StrategyArg::Majority => AggregationStrategy::Majority,
        };
    }

    if let Some(timeout) = &cli.round_timeout {
        let timeout = parse_duration(timeout).context("Invalid --round-timeout")?;
        config.coordinator.round_timeout_ms = timeout.as_millis() as u64;
    }

    if cli.synthesize_timeouts {
        config.coordinator.synthesize_timeouts = true;
    }

    if let Some(url) = &cli.coordinator_url {
        config.worker.coordinator_url = url.clone();
    }

    if let Some(address) = &cli.bus_address {
        config.bus.address = address.clone();
    }

    if let Some(id) = &cli.worker_id {
        config.worker.id = Some(id.clone());
    }

    if let Some(url) = &cli.advertise_url {
        config.worker.advertise_url = Some(url.clone());
    }

    if cli.no_register {
        config.worker.register = false;
    }

    if let Some(rate) = cli.failure_rate {
        config.worker.failure_rate = rate;
    }

    if cli.unreliable {
        config.worker.reliable = false;
    }

    if let Some(seed) = cli.seed {
        config.worker.seed = Some(seed);
    }

    if let Some(queries) = &cli.queries {
        config.runtime.demo_queries = queries
            .iter()
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty())
            .collect();
    }

    if cli.debug {
        config.runtime.debug = true;
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::io::Write;

    #[test]
    fn test_parse_partial_file() {
        let config = parse_toml_string(
            r#"
            [coordinator]
            port = 9090
            strategy = "median"
            round_timeout_ms = 1500

            [bus]
            address = "10.0.0.2:4222"
            "#,
        )
        .unwrap();

        assert_eq!(config.coordinator.port, 9090);
        assert_eq!(config.coordinator.strategy, AggregationStrategy::Median);
        assert_eq!(config.coordinator.round_timeout_ms, 1500);
        // Unset fields keep defaults
        assert_eq!(config.coordinator.request_timeout_ms, 10_000);
        assert_eq!(config.bus.address, "10.0.0.2:4222");
        assert_eq!(config.bus.task_subject, "oracle.tasks");
        assert_eq!(config.worker, WorkerConfig::default());
    }

    #[test]
    fn test_empty_file_is_default() {
        assert_eq!(parse_toml_string("").unwrap(), Config::default());
    }

    #[test]
    fn test_topology_names() {
        let config = parse_toml_string("[coordinator]\ntopology = \"bus\"\n").unwrap();
        assert_eq!(config.coordinator.topology, TopologyKind::Bus);

        assert!(parse_toml_string("[coordinator]\ntopology = \"mesh\"\n").is_err());
    }

    #[test]
    fn test_parse_file_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[worker]\nport = 9001\nfailure_rate = 0.0\nseed = 7").unwrap();

        let config = parse_toml_file(file.path()).unwrap();
        assert_eq!(config.worker.port, 9001);
        assert_eq!(config.worker.failure_rate, 0.0);
        assert_eq!(config.worker.seed, Some(7));
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = parse_toml_file(Path::new("/nonexistent/oraclenet.toml")).unwrap_err();
        assert!(format!("{:#}", err).contains("/nonexistent/oraclenet.toml"));
    }

    #[test]
    fn test_cli_overrides_file() {
        let file = parse_toml_string("[coordinator]\nport = 9090\nstrategy = \"median\"\n").unwrap();
        let cli = Cli::parse_from([
            "oraclenet",
            "--strategy",
            "majority",
            "--round-timeout",
            "750ms",
            "--topology",
            "bus",
        ]);

        let config = merge_cli_with_config(&cli, file).unwrap();
        assert_eq!(config.coordinator.port, 9090);
        assert_eq!(config.coordinator.strategy, AggregationStrategy::Majority);
        assert_eq!(config.coordinator.round_timeout_ms, 750);
        assert_eq!(config.coordinator.topology, TopologyKind::Bus);
        assert_eq!(config.worker.topology, TopologyKind::Bus);
    }

    #[test]
    fn test_port_follows_mode() {
        let cli = Cli::parse_from(["oraclenet", "--mode", "worker", "--port", "8099"]);
        let config = merge_cli_with_config(&cli, Config::default()).unwrap();

        assert_eq!(config.worker.port, 8099);
        assert_eq!(config.coordinator.port, 8080);
    }

    #[test]
    fn test_unreliable_flag() {
        let file = parse_toml_string("[worker]\nreliable = true\n").unwrap();
        assert!(file.worker.reliable);

        let cli = Cli::parse_from(["oraclenet", "--mode", "worker", "--unreliable"]);
        let config = merge_cli_with_config(&cli, file).unwrap();
        assert!(!config.worker.reliable);
    }

    #[test]
    fn test_bad_round_timeout() {
        let cli = Cli::parse_from(["oraclenet", "--round-timeout", "soon"]);
        assert!(merge_cli_with_config(&cli, Config::default()).is_err());
    }
}
