//! Configuration validation

use super::*;
use anyhow::Result;

/// Validate complete configuration
pub fn validate_config(config: &Config) -> Result<()> {
    validate_coordinator(&config.coordinator)?;
    validate_worker(&config.worker)?;
    validate_bus(&config.bus)?;
    validate_runtime(&config.runtime)?;

    Ok(())
}

/// Validate coordinator configuration
pub fn validate_coordinator(coordinator: &CoordinatorConfig) -> Result<()> {
    if coordinator.port == 0 {
        anyhow::bail!("coordinator.port must be non-zero");
    }

    if coordinator.round_timeout_ms == 0 {
        anyhow::bail!("coordinator.round_timeout_ms must be greater than 0");
    }

    if coordinator.request_timeout_ms == 0 {
        anyhow::bail!("coordinator.request_timeout_ms must be greater than 0");
    }

    if coordinator.worker_call_timeout_ms == 0 {
        anyhow::bail!("coordinator.worker_call_timeout_ms must be greater than 0");
    }

    if coordinator.eviction_interval_ms == 0 {
        anyhow::bail!("coordinator.eviction_interval_ms must be greater than 0");
    }

    if coordinator.stale_threshold_ms <= coordinator.eviction_interval_ms {
        anyhow::bail!(
            "coordinator.stale_threshold_ms ({}) must exceed eviction_interval_ms ({})",
            coordinator.stale_threshold_ms,
            coordinator.eviction_interval_ms
        );
    }

    if coordinator.round_timeout_ms > coordinator.request_timeout_ms {
        log::warn!(
            "round_timeout_ms ({}) exceeds request_timeout_ms ({}); rounds over HTTP will close at the request deadline",
            coordinator.round_timeout_ms,
            coordinator.request_timeout_ms
        );
    }

    Ok(())
}

/// Validate worker configuration
pub fn validate_worker(worker: &WorkerConfig) -> Result<()> {
    if worker.port == 0 {
        anyhow::bail!("worker.port must be non-zero");
    }

    if let Some(id) = &worker.id {
        if id.trim().is_empty() {
            anyhow::bail!("worker.id must not be empty when set");
        }
    }

    if !is_http_url(&worker.coordinator_url) {
        anyhow::bail!(
            "worker.coordinator_url must start with http:// or https://, got '{}'",
            worker.coordinator_url
        );
    }

    if let Some(url) = &worker.advertise_url {
        if !is_http_url(url) {
            anyhow::bail!("worker.advertise_url must start with http:// or https://, got '{}'", url);
        }
    }

    if worker.registration_attempts == 0 {
        anyhow::bail!("worker.registration_attempts must be at least 1");
    }

    if worker.heartbeat_interval_ms == 0 {
        anyhow::bail!("worker.heartbeat_interval_ms must be greater than 0");
    }

    if !(0.0..=1.0).contains(&worker.failure_rate) {
        anyhow::bail!("worker.failure_rate must be between 0.0 and 1.0, got {}", worker.failure_rate);
    }

    if worker.min_delay_ms > worker.max_delay_ms {
        anyhow::bail!(
            "worker.min_delay_ms ({}) must not exceed max_delay_ms ({})",
            worker.min_delay_ms,
            worker.max_delay_ms
        );
    }

    if !(0.0..1.0).contains(&worker.variance) {
        anyhow::bail!("worker.variance must be in [0.0, 1.0), got {}", worker.variance);
    }

    Ok(())
}

/// Validate bus configuration
pub fn validate_bus(bus: &BusConfig) -> Result<()> {
    if bus.address.trim().is_empty() {
        anyhow::bail!("bus.address must not be empty");
    }

    if bus.task_subject.trim().is_empty() || bus.result_subject.trim().is_empty() {
        anyhow::bail!("bus.task_subject and bus.result_subject must not be empty");
    }

    if bus.task_subject == bus.result_subject {
        anyhow::bail!("bus.task_subject and bus.result_subject must differ ('{}')", bus.task_subject);
    }

    Ok(())
}

/// Validate runtime configuration
pub fn validate_runtime(runtime: &RuntimeConfig) -> Result<()> {
    if runtime.demo_queries.iter().any(|q| q.trim().is_empty()) {
        anyhow::bail!("runtime.demo_queries must not contain empty queries");
    }

    Ok(())
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_zero_round_timeout() {
        let mut config = Config::default();
        config.coordinator.round_timeout_ms = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_stale_threshold_must_exceed_interval() {
        let mut config = Config::default();
        config.coordinator.stale_threshold_ms = 30_000;
        config.coordinator.eviction_interval_ms = 30_000;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_worker_bounds() {
        let mut worker = WorkerConfig::default();
        worker.failure_rate = 1.5;
        assert!(validate_worker(&worker).is_err());

        let mut worker = WorkerConfig::default();
        worker.min_delay_ms = 500;
        worker.max_delay_ms = 100;
        assert!(validate_worker(&worker).is_err());

        let mut worker = WorkerConfig::default();
        worker.variance = 1.0;
        assert!(validate_worker(&worker).is_err());

        let mut worker = WorkerConfig::default();
        worker.coordinator_url = "localhost:8080".to_string();
        assert!(validate_worker(&worker).is_err());
    }

    #[test]
    fn test_subjects_must_differ() {
        let mut bus = BusConfig::default();
        bus.result_subject = bus.task_subject.clone();
        assert!(validate_bus(&bus).is_err());
    }
}
