//! Simulated price feed
//!
//! Stands in for a real data source on worker nodes: every task sleeps for a
//! random delay, fails with a configured probability, and otherwise returns a
//! base value for the query perturbed by a bounded random variance.
//!
//! The RNG is xoshiro256++ so a seeded simulator replays the same sequence.

use crate::distributed::protocol::{OracleRequest, WorkerOutcome};
use crate::error::WorkerFailure;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Simulation parameters
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatorSettings {
    /// Probability in `[0, 1]` that a task fails
    pub failure_rate: f64,
    pub min_delay: Duration,
    pub max_delay: Duration,

    /// Relative spread around the base value; 0.05 means ±5%
    pub variance: f64,
}

impl Default for SimulatorSettings {
    fn default() -> Self {
        Self {
            failure_rate: 0.1,
            min_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(2000),
            variance: 0.05,
        }
    }
}

/// What the simulator decided for one task
#[derive(Debug, Clone, PartialEq)]
pub struct TaskPlan {
    pub delay: Duration,

    /// `None` when the task fails
    pub value: Option<f64>,
}

/// Base price for a query
pub fn base_value(query: &str) -> f64 {
    match query {
        "BTC/USD" => 42000.0,
        "ETH/USD" => 2500.0,
        "SOL/USD" => 100.0,
        "MATIC/USD" => 0.8,
        _ => 1000.0,
    }
}

pub struct ValueSimulator {
    settings: SimulatorSettings,
    rng: Mutex<Xoshiro256PlusPlus>,
}

impl ValueSimulator {
    pub fn new(settings: SimulatorSettings) -> Self {
        Self {
            settings,
            rng: Mutex::new(Xoshiro256PlusPlus::from_entropy()),
        }
    }

    /// Deterministic simulator
    pub fn with_seed(settings: SimulatorSettings, seed: u64) -> Self {
        Self {
            settings,
            rng: Mutex::new(Xoshiro256PlusPlus::seed_from_u64(seed)),
        }
    }

    pub fn settings(&self) -> &SimulatorSettings {
        &self.settings
    }

    /// Draw the delay and value for one task
    pub fn plan(&self, query: &str) -> TaskPlan {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);

        let min = self.settings.min_delay.as_millis() as u64;
        let max = self.settings.max_delay.as_millis() as u64;
        let delay = if max > min {
            Duration::from_millis(rng.gen_range(min..max))
        } else {
            Duration::from_millis(min)
        };

        if rng.gen::<f64>() < self.settings.failure_rate {
            return TaskPlan { delay, value: None };
        }

        let base = base_value(query);
        // Uniform in [-variance, +variance) of the base
        let spread = (rng.gen::<f64>() - 0.5) * 2.0 * self.settings.variance * base;

        TaskPlan {
            delay,
            value: Some(base + spread),
        }
    }

    /// Process one task the way a worker node does
    pub async fn process(&self, worker_id: &str, request: &OracleRequest) -> WorkerOutcome {
        let start = Instant::now();
        let plan = self.plan(&request.query);

        tokio::time::sleep(plan.delay).await;

        match plan.value {
            Some(value) => WorkerOutcome::success(worker_id, &request.id, value, start.elapsed()),
            None => WorkerOutcome::failure(worker_id, &request.id, WorkerFailure::Simulated, start.elapsed()),
        }
    }
}
