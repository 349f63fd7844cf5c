//! Worker proxies
//!
//! A [`WorkerProxy`] performs one request/response exchange with one worker and
//! always returns a [`WorkerOutcome`]. Every failure (encode, transport, non-2xx
//! status, undecodable body) is folded into the outcome's `err` field; nothing
//! escapes as an error, so one bad worker can never abort a round.
//!
//! # Implementations
//!
//! - [`HttpWorkerProxy`]: `POST {endpoint}/task` with a JSON body
//! - [`mock::MockWorkerProxy`]: scripted values, delays and failures for tests

pub mod mock;
pub mod simulator;

use crate::distributed::protocol::{OracleRequest, WorkerOutcome};
use crate::error::WorkerFailure;
use crate::registry::WorkerRecord;
use anyhow::Context;
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;

/// One exchange with one worker
///
/// Implementations must be cancel-safe: the dispatcher drops in-flight calls
/// when a round's window closes.
#[async_trait]
pub trait WorkerProxy: Send + Sync {
    async fn call(&self, target: &WorkerRecord, request: &OracleRequest) -> WorkerOutcome;
}

/// HTTP worker proxy
pub struct HttpWorkerProxy {
    client: reqwest::Client,
}

impl HttpWorkerProxy {
    /// Create a proxy whose individual calls give up after `call_timeout`
    pub fn new(call_timeout: Duration) -> crate::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(call_timeout)
            .build()
            .context("Failed to build worker HTTP client")?;

        Ok(Self { client })
    }

    async fn exchange(
        &self,
        target: &WorkerRecord,
        request: &OracleRequest,
    ) -> Result<WorkerOutcome, WorkerFailure> {
        let body = serde_json::to_vec(request).map_err(|e| WorkerFailure::Encode(e.to_string()))?;
        let url = format!("{}/task", target.endpoint.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| WorkerFailure::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(WorkerFailure::Status(status.as_u16()));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| WorkerFailure::Transport(e.to_string()))?;

        serde_json::from_slice(&bytes).map_err(|e| WorkerFailure::Decode(e.to_string()))
    }
}

#[async_trait]
impl WorkerProxy for HttpWorkerProxy {
    async fn call(&self, target: &WorkerRecord, request: &OracleRequest) -> WorkerOutcome {
        let start = Instant::now();

        match self.exchange(target, request).await {
            Ok(mut outcome) => {
                // Identity and timing come from the coordinator's view, not the body
                outcome.worker_id = target.id.clone();
                outcome.request_id = request.id.clone();
                outcome.response_time = start.elapsed();
                outcome
            }
            Err(failure) => {
                log::debug!("Worker {} failed on {}: {}", target.id, request.id, failure);
                WorkerOutcome::failure(&target.id, &request.id, failure, start.elapsed())
            }
        }
    }
}
