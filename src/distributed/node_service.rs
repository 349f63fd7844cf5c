//! Worker node service
//!
//! This module implements the process that answers oracle tasks. A node runs
//! in one of two topologies:
//!
//! - **Direct**: serves `POST /task` and `GET /health` over HTTP, registers
//!   with the coordinator (bounded retries) and re-registers on every
//!   heartbeat so its registry record never goes stale.
//! - **Bus**: subscribes to the task subject, processes every task
//!   concurrently and publishes each outcome on the result subject.
//!
//! Values come from the [`ValueSimulator`]; the node itself only handles
//! transport.

use crate::api::response::ApiError;
use crate::bus::{MessageBus, Subjects};
use crate::config::WorkerConfig;
use crate::distributed::protocol::*;
use crate::util::ids::{generate_worker_id, node_name};
use crate::worker::simulator::ValueSimulator;
use anyhow::{Context, Result};
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Worker node
pub struct NodeService {
    worker_id: String,

    /// Hostname, reported by `/health`
    node_id: String,

    /// Self-reported flag stamped on every outcome and shown by `/health`
    reliable: AtomicBool,
    simulator: ValueSimulator,
}

#[derive(Debug, Serialize)]
struct HealthBody {
    status: &'static str,
    worker_id: String,
    reliable: bool,
    host: String,
}

impl NodeService {
    pub fn new(worker_id: impl Into<String>, simulator: ValueSimulator) -> Self {
        Self {
            worker_id: worker_id.into(),
            node_id: node_name(),
            reliable: AtomicBool::new(true),
            simulator,
        }
    }

    /// Node with the configured (or a generated) id and simulator
    pub fn from_config(config: &WorkerConfig) -> Self {
        let worker_id = config.id.clone().unwrap_or_else(generate_worker_id);
        let simulator = match config.seed {
            Some(seed) => ValueSimulator::with_seed(config.simulator_settings(), seed),
            None => ValueSimulator::new(config.simulator_settings()),
        };

        let node = Self::new(worker_id, simulator);
        node.set_reliable(config.reliable);
        node
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn is_reliable(&self) -> bool {
        self.reliable.load(Ordering::Relaxed)
    }

    /// Change the flag reported from now on; tasks already running keep theirs
    pub fn set_reliable(&self, reliable: bool) {
        if self.reliable.swap(reliable, Ordering::Relaxed) != reliable {
            log::info!("Worker {} now reports reliable={}", self.worker_id, reliable);
        }
    }

    /// Answer one task
    pub async fn handle_task(&self, request: &OracleRequest) -> WorkerOutcome {
        log::info!("📋 Worker {} processing task {}: {}", self.worker_id, request.id, request.query);

        let reliable = self.is_reliable();
        let mut outcome = self.simulator.process(&self.worker_id, request).await;
        outcome.reliable = Some(reliable);
        outcome
    }

    /// HTTP routes of a direct-topology node
    pub fn router(self: Arc<Self>) -> Router {
        Router::new()
            .route("/task", post(task_handler))
            .route("/health", get(health_handler))
            .with_state(self)
    }

    /// Serve the HTTP routes on an already-bound listener
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        axum::serve(listener, self.router())
            .await
            .context("Worker HTTP server failed")
    }

    /// Run a direct-topology node until the server stops
    pub async fn run_http(self: Arc<Self>, config: &WorkerConfig) -> Result<()> {
        let addr = format!("0.0.0.0:{}", config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind worker server on {}", addr))?;

        println!("🔧 Worker {} listening on port {}", self.worker_id, config.port);
        println!("Node: {}", self.node_id);

        let heartbeat = if config.register {
            let registrar = Registrar::new(&config.coordinator_url, &self.worker_id, &config.endpoint())?;
            Some(registrar.spawn_heartbeat(
                config.registration_attempts,
                config.registration_interval(),
                config.heartbeat_interval(),
            ))
        } else {
            println!("Registration disabled; coordinator must learn this worker another way");
            None
        };

        let result = self.serve(listener).await;
        if let Some(handle) = heartbeat {
            handle.abort();
        }
        result
    }

    /// Run a bus-topology node until the task subscription ends
    pub async fn run_bus(self: Arc<Self>, bus: Arc<dyn MessageBus>, subjects: Subjects) -> Result<()> {
        let mut tasks = bus
            .subscribe(&subjects.tasks)
            .await
            .with_context(|| format!("Failed to subscribe to {}", subjects.tasks))?;

        println!("🔧 Worker {} listening on subject {}", self.worker_id, subjects.tasks);

        while let Some(payload) = tasks.next().await {
            let request: OracleRequest = match decode_payload(&payload) {
                Ok(request) => request,
                Err(e) => {
                    log::warn!("Worker {} ignoring malformed task: {:#}", self.worker_id, e);
                    continue;
                }
            };

            let node = Arc::clone(&self);
            let bus = Arc::clone(&bus);
            let results = subjects.results.clone();
            tokio::spawn(async move {
                let outcome = node.handle_task(&request).await;
                let published = match encode_payload(&outcome) {
                    Ok(payload) => bus.publish(&results, payload).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = published {
                    log::error!("Worker {} failed to publish result for {}: {:#}", node.worker_id, request.id, e);
                }
            });
        }

        log::info!("Task subscription for worker {} closed", self.worker_id);
        Ok(())
    }
}

async fn task_handler(
    State(node): State<Arc<NodeService>>,
    body: Result<Json<OracleRequest>, JsonRejection>,
) -> Result<Json<WorkerOutcome>, ApiError> {
    let Json(request) = body.map_err(|rejection| ApiError::invalid_request(rejection.body_text()))?;
    Ok(Json(node.handle_task(&request).await))
}

async fn health_handler(State(node): State<Arc<NodeService>>) -> Json<HealthBody> {
    Json(HealthBody {
        status: "healthy",
        worker_id: node.worker_id.clone(),
        reliable: node.is_reliable(),
        host: node.node_id.clone(),
    })
}

/// Registration client of a direct-topology node
#[derive(Clone)]
pub struct Registrar {
    client: reqwest::Client,
    register_url: String,
    request: RegisterRequest,
}

impl Registrar {
    pub fn new(coordinator_url: &str, worker_id: &str, endpoint: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .context("Failed to build registration HTTP client")?;

        Ok(Self {
            client,
            register_url: format!("{}/register", coordinator_url.trim_end_matches('/')),
            request: RegisterRequest {
                id: worker_id.to_string(),
                endpoint: endpoint.to_string(),
            },
        })
    }

    /// One registration attempt
    pub async fn register_once(&self) -> Result<RegisterResponse> {
        let response = self
            .client
            .post(&self.register_url)
            .json(&self.request)
            .send()
            .await
            .with_context(|| format!("Failed to reach coordinator at {}", self.register_url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Coordinator returned status {}: {}", status.as_u16(), body);
        }

        response
            .json::<RegisterResponse>()
            .await
            .context("Failed to decode registration response")
    }

    /// Register, retrying up to `attempts` times `interval` apart
    pub async fn register_with_retry(&self, attempts: u32, interval: Duration) -> Result<RegisterResponse> {
        let attempts = attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            match self.register_once().await {
                Ok(response) => {
                    log::info!("✅ Worker {} registered: {}", self.request.id, response.message);
                    return Ok(response);
                }
                Err(e) => {
                    log::warn!(
                        "Registration attempt {}/{} for {} failed: {:#}",
                        attempt,
                        attempts,
                        self.request.id,
                        e
                    );
                    last_error = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(interval).await;
                    }
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| anyhow::anyhow!("registration not attempted"))
            .context(format!("Giving up registration after {} attempts", attempts)))
    }

    /// Register now, then re-register every `heartbeat` to refresh last-seen
    ///
    /// Failures are logged; the worker keeps serving either way.
    pub fn spawn_heartbeat(self, attempts: u32, interval: Duration, heartbeat: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(e) = self.register_with_retry(attempts, interval).await {
                log::error!("❌ {:#}", e);
            }

            let mut ticker = tokio::time::interval(heartbeat);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match self.register_once().await {
                    Ok(_) => log::debug!("💓 Heartbeat sent for {}", self.request.id),
                    Err(e) => log::warn!("Heartbeat for {} failed: {:#}", self.request.id, e),
                }
            }
        })
    }
}
