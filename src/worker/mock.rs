//! Mock worker proxy for testing
//!
//! Simulates workers without any network traffic. Each worker id can be
//! scripted with a value, a delay and a failure; unscripted workers answer
//! immediately with the default value. Every call is recorded so tests can
//! check which workers a round reached.
//!
//! # Example
//!
//! ```
//! use oraclenet::worker::mock::{MockBehavior, MockWorkerProxy};
//! use std::time::Duration;
//!
//! let proxy = MockWorkerProxy::new();
//! proxy.set_behavior("worker-slow", MockBehavior::value(42.0).delayed(Duration::from_secs(10)));
//! proxy.set_behavior("worker-bad", MockBehavior::failing("simulated worker failure"));
//! ```

use super::WorkerProxy;
use crate::distributed::protocol::{OracleRequest, WorkerOutcome};
use crate::registry::WorkerRecord;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Scripted behavior for one worker
#[derive(Debug, Clone, PartialEq)]
pub struct MockBehavior {
    pub value: f64,
    pub delay: Duration,

    /// When set, the worker fails with this error string
    pub error: Option<String>,
}

impl MockBehavior {
    pub fn value(value: f64) -> Self {
        Self {
            value,
            delay: Duration::ZERO,
            error: None,
        }
    }

    pub fn failing(error: impl Into<String>) -> Self {
        Self {
            value: 0.0,
            delay: Duration::ZERO,
            error: Some(error.into()),
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self::value(1.0)
    }
}

/// Record of a call for test verification
#[derive(Debug, Clone, PartialEq)]
pub struct CallRecord {
    pub worker_id: String,
    pub request_id: String,
    pub query: String,
}

/// Mock worker proxy
#[derive(Clone, Default)]
pub struct MockWorkerProxy {
    behaviors: Arc<Mutex<HashMap<String, MockBehavior>>>,
    default_behavior: Arc<Mutex<MockBehavior>>,
    calls: Arc<Mutex<Vec<CallRecord>>>,
}

impl MockWorkerProxy {
    /// Every worker answers `1.0` immediately until scripted otherwise
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_behavior(&self, worker_id: &str, behavior: MockBehavior) {
        self.behaviors.lock().unwrap().insert(worker_id.to_string(), behavior);
    }

    /// Behavior for workers without a script
    pub fn set_default_behavior(&self, behavior: MockBehavior) {
        *self.default_behavior.lock().unwrap() = behavior;
    }

    pub fn calls(&self) -> Vec<CallRecord> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn behavior_for(&self, worker_id: &str) -> MockBehavior {
        let behaviors = self.behaviors.lock().unwrap();
        match behaviors.get(worker_id) {
            Some(behavior) => behavior.clone(),
            None => self.default_behavior.lock().unwrap().clone(),
        }
    }
}

#[async_trait]
impl WorkerProxy for MockWorkerProxy {
    async fn call(&self, target: &WorkerRecord, request: &OracleRequest) -> WorkerOutcome {
        let start = Instant::now();

        self.calls.lock().unwrap().push(CallRecord {
            worker_id: target.id.clone(),
            request_id: request.id.clone(),
            query: request.query.clone(),
        });

        let behavior = self.behavior_for(&target.id);
        if !behavior.delay.is_zero() {
            tokio::time::sleep(behavior.delay).await;
        }

        match behavior.error {
            Some(error) => WorkerOutcome::failure(&target.id, &request.id, error, start.elapsed()),
            None => WorkerOutcome::success(&target.id, &request.id, behavior.value, start.elapsed()),
        }
    }
}
