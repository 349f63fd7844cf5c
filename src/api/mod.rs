//! Coordinator HTTP surface
//!
//! Routes:
//!
//! - `GET /health`: liveness plus worker count and topology
//! - `POST /register`: worker registration (direct topology)
//! - `GET /workers`: registry snapshot
//! - `POST /request`: run one round and return the aggregated result
//!
//! Round outcomes map onto statuses as follows: a round where no worker
//! answered is a 504, a round where every answer failed is a 502 carrying the
//! reliability note, anything else is a 200 with the result body.
//!
//! Every route is wrapped by the layers in [`middleware`]: an access log line
//! per request, handler panics turned into a JSON 500, and permissive CORS.

pub mod middleware;
pub mod response;

use crate::dispatch::RoundContext;
use crate::distributed::coordinator::OracleCoordinator;
use crate::distributed::protocol::{OracleRequest, OracleResult, RegisterRequest, RegisterResponse};
use crate::error::WorkerFailure;
use crate::registry::WorkerRecord;
use anyhow::{Context, Result};
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use response::ApiError;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<OracleCoordinator>,

    /// Port reported by `/health`
    pub port: u16,

    /// Upper bound on a whole `/request` call
    pub request_timeout: Duration,
}

/// `GET /health` body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub workers: usize,
    pub topology: String,
    pub port: u16,
}

pub fn router(state: AppState) -> Router {
    let routes = Router::new()
        .route("/health", get(health_handler))
        .route("/register", post(register_handler))
        .route("/workers", get(workers_handler))
        .route("/request", post(request_handler))
        .with_state(state);

    middleware::with_middleware(routes)
}

/// Serve the coordinator routes on an already-bound listener
pub async fn serve(listener: TcpListener, state: AppState) -> Result<()> {
    let service = router(state).into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, service)
        .await
        .context("Coordinator HTTP server failed")
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        workers: state.coordinator.worker_count(),
        topology: state.coordinator.topology_name().to_string(),
        port: state.port,
    })
}

async fn register_handler(
    State(state): State<AppState>,
    body: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<Json<RegisterResponse>, ApiError> {
    let Json(request) = body.map_err(|rejection| ApiError::invalid_request(rejection.body_text()))?;
    let response = state.coordinator.register_worker(&request)?;
    Ok(Json(response))
}

async fn workers_handler(State(state): State<AppState>) -> Json<Vec<WorkerRecord>> {
    let workers = state
        .coordinator
        .registry()
        .map(|registry| registry.snapshot())
        .unwrap_or_default();
    Json(workers)
}

async fn request_handler(
    State(state): State<AppState>,
    body: Result<Json<OracleRequest>, JsonRejection>,
) -> Result<Json<OracleResult>, ApiError> {
    let Json(request) = body.map_err(|rejection| ApiError::invalid_request(rejection.body_text()))?;

    let ctx = RoundContext::with_timeout(state.request_timeout);
    let result = state.coordinator.submit_request(&ctx, request).await?;

    classify(result).map(Json)
}

/// Turn a completed round into the response the caller sees
fn classify(result: OracleResult) -> Result<OracleResult, ApiError> {
    if result.is_dispatch_failure() {
        return Err(ApiError::message_queue_unavailable(result.reliability_note));
    }

    let timeout = WorkerFailure::Timeout.to_string();
    let answered = result
        .worker_responses
        .iter()
        .filter(|o| o.err.as_deref() != Some(timeout.as_str()))
        .count();

    if answered == 0 {
        log::warn!("⏱️  Round {} closed without any worker answer", result.request_id);
        return Err(ApiError::worker_timeout());
    }
    if !result.has_data() {
        return Err(ApiError::no_successful_responses(result.reliability_note));
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::Dispatcher;
    use crate::distributed::coordinator::RoundSettings;
    use crate::distributed::protocol::WorkerOutcome;
    use crate::registry::WorkerRegistry;
    use crate::stats::AggregationStrategy;
    use crate::worker::mock::{MockBehavior, MockWorkerProxy};

    async fn spawn_server(round_timeout: Duration) -> (String, MockWorkerProxy) {
        let proxy = MockWorkerProxy::new();
        let coordinator = OracleCoordinator::direct(
            Arc::new(WorkerRegistry::new()),
            Dispatcher::new(Arc::new(proxy.clone())),
            RoundSettings {
                round_timeout,
                strategy: AggregationStrategy::Median,
            },
        );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = AppState {
            coordinator: Arc::new(coordinator),
            port: addr.port(),
            request_timeout: Duration::from_secs(10),
        };
        tokio::spawn(serve(listener, state));

        (format!("http://{}", addr), proxy)
    }

    async fn register(client: &reqwest::Client, base: &str, id: &str) {
        let response = client
            .post(format!("{}/register", base))
            .json(&RegisterRequest {
                id: id.to_string(),
                endpoint: format!("mock://{}", id),
            })
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
    }

    #[tokio::test]
    async fn test_health_and_registration() {
        let (base, _) = spawn_server(Duration::from_millis(500)).await;
        let client = reqwest::Client::new();

        let health: HealthResponse = client
            .get(format!("{}/health", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health.status, "healthy");
        assert_eq!(health.workers, 0);
        assert_eq!(health.topology, "direct");

        register(&client, &base, "w1").await;
        register(&client, &base, "w2").await;

        let workers: Vec<WorkerRecord> = client
            .get(format!("{}/workers", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let ids: Vec<_> = workers.iter().map(|w| w.id.as_str()).collect();
        assert_eq!(ids, vec!["w1", "w2"]);
    }

    #[tokio::test]
    async fn test_request_round_trip() {
        let (base, proxy) = spawn_server(Duration::from_millis(500)).await;
        let client = reqwest::Client::new();
        register(&client, &base, "w1").await;
        register(&client, &base, "w2").await;
        register(&client, &base, "w3").await;
        proxy.set_behavior("w1", MockBehavior::value(10.0));
        proxy.set_behavior("w2", MockBehavior::value(20.0));
        proxy.set_behavior("w3", MockBehavior::value(90.0));

        let response = client
            .post(format!("{}/request", base))
            .json(&OracleRequest::new("BTC/USD"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);

        let result: OracleResult = response.json().await.unwrap();
        assert_eq!(result.final_value, 20.0);
        assert_eq!(result.worker_responses.len(), 3);
        assert_eq!(result.reliability_note, "All workers responded successfully");
    }

    #[tokio::test]
    async fn test_request_error_statuses() {
        let (base, proxy) = spawn_server(Duration::from_millis(200)).await;
        let client = reqwest::Client::new();
        let url = format!("{}/request", base);

        // Nobody registered yet
        let response = client.post(&url).json(&OracleRequest::new("BTC/USD")).send().await.unwrap();
        assert_eq!(response.status(), 503);
        let body: ApiError = response.json().await.unwrap();
        assert_eq!(body.error, "no workers available");

        // Malformed body
        let response = client
            .post(&url)
            .header("content-type", "application/json")
            .body("{not json")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400);

        register(&client, &base, "w1").await;

        // Empty query
        let response = client.post(&url).json(&OracleRequest::new("")).send().await.unwrap();
        assert_eq!(response.status(), 400);

        // Every worker fails
        proxy.set_default_behavior(MockBehavior::failing("simulated worker failure"));
        let response = client.post(&url).json(&OracleRequest::new("BTC/USD")).send().await.unwrap();
        assert_eq!(response.status(), 502);
        let body: ApiError = response.json().await.unwrap();
        assert_eq!(body.details.as_deref(), Some("Low reliability: only 0/1 workers succeeded"));

        // Every worker is too slow
        proxy.set_default_behavior(MockBehavior::value(1.0).delayed(Duration::from_secs(5)));
        let response = client.post(&url).json(&OracleRequest::new("BTC/USD")).send().await.unwrap();
        assert_eq!(response.status(), 504);
    }

    #[tokio::test]
    async fn test_cors_preflight_on_request_route() {
        let (base, _) = spawn_server(Duration::from_millis(200)).await;

        let response = reqwest::Client::new()
            .request(reqwest::Method::OPTIONS, format!("{}/request", base))
            .header("origin", "http://dashboard.local")
            .header("access-control-request-method", "POST")
            .header("access-control-request-headers", "content-type")
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
        let headers = response.headers();
        assert_eq!(headers["access-control-allow-origin"], "*");
        assert_eq!(headers["access-control-max-age"], "86400");
        let methods = headers["access-control-allow-methods"].to_str().unwrap();
        assert!(methods.contains("POST"));
        assert!(methods.contains("DELETE"));
        let allowed = headers["access-control-allow-headers"].to_str().unwrap().to_ascii_lowercase();
        assert!(allowed.contains("content-type"));
        assert!(allowed.contains("x-requested-with"));
    }

    #[test]
    fn test_classify() {
        let ok = OracleResult {
            request_id: "req-1".into(),
            final_value: 5.0,
            worker_responses: vec![WorkerOutcome::success("w1", "req-1", 5.0, Duration::from_millis(3))],
            reliability_note: "All workers responded successfully".into(),
        };
        assert!(classify(ok).is_ok());

        let timed_out = OracleResult {
            request_id: "req-2".into(),
            final_value: 0.0,
            worker_responses: vec![WorkerOutcome::failure("w1", "req-2", "timeout", Duration::from_secs(3))],
            reliability_note: "Low reliability: only 0/1 workers succeeded".into(),
        };
        assert_eq!(classify(timed_out).unwrap_err().code, 504);

        let failed = OracleResult::dispatch_failed("req-3", "bus closed");
        assert_eq!(classify(failed).unwrap_err().error, "message queue unavailable");
    }
}
