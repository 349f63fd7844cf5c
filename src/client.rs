//! Demo client
//!
//! Talks to a running coordinator over HTTP: checks its health, submits
//! queries and prints each result with its per-worker breakdown.

use crate::api::response::ApiError;
use crate::api::HealthResponse;
use crate::config::Config;
use crate::distributed::protocol::{OracleRequest, OracleResult};
use crate::util::ids::generate_request_id;
use crate::util::time::format_duration;
use anyhow::{Context, Result};
use std::time::Duration;

/// HTTP client for the coordinator API
#[derive(Clone)]
pub struct OracleClient {
    base_url: String,
    client: reqwest::Client,
}

impl OracleClient {
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_timeout(base_url, Duration::from_secs(15))
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn health(&self) -> Result<HealthResponse> {
        let url = format!("{}/health", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Failed to reach coordinator at {}", url))?;

        if !response.status().is_success() {
            anyhow::bail!("Coordinator health check returned status {}", response.status().as_u16());
        }

        response.json().await.context("Failed to decode health response")
    }

    /// Submit one query under a fresh request id
    pub async fn submit(&self, query: &str) -> Result<OracleResult> {
        let request = OracleRequest::with_id(generate_request_id(), query);
        log::info!("📤 Submitting request {}: {}", request.id, request.query);

        let url = format!("{}/request", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("Failed to submit request {}", request.id))?;

        let status = response.status();
        if !status.is_success() {
            // Prefer the structured error body when the coordinator sent one
            return match response.json::<ApiError>().await {
                Ok(err) => match err.details {
                    Some(details) => anyhow::bail!("{} ({}): {}", err.error, err.code, details),
                    None => anyhow::bail!("{} ({})", err.error, err.code),
                },
                Err(_) => anyhow::bail!("Coordinator returned status {}", status.as_u16()),
            };
        }

        response
            .json()
            .await
            .with_context(|| format!("Failed to decode result for {}", request.id))
    }
}

/// Render one result the way the demo prints it
pub fn format_result(query: &str, result: &OracleResult) -> String {
    let mut out = String::new();
    out.push_str(&format!("🎯 Query: {}\n", query));
    out.push_str(&format!("💰 Final Value: ${:.2}\n", result.final_value));
    out.push_str(&format!("📊 Workers: {}\n", result.worker_responses.len()));
    out.push_str(&format!("⚠️  Note: {}\n", result.reliability_note));
    out.push_str("\n📋 Worker Details:\n");

    for outcome in &result.worker_responses {
        match &outcome.err {
            Some(err) => out.push_str(&format!(
                "  ❌ {}: {} (took {})\n",
                outcome.worker_id,
                err,
                format_duration(outcome.response_time)
            )),
            None => out.push_str(&format!(
                "  ✅ {}: ${:.2} (took {})\n",
                outcome.worker_id,
                outcome.value,
                format_duration(outcome.response_time)
            )),
        }
    }

    out
}

/// Run the demo against the configured coordinator
pub async fn run_demo(config: &Config) -> Result<()> {
    let client = OracleClient::new(&config.worker.coordinator_url)?;
    let queries = &config.runtime.demo_queries;
    let pause = Duration::from_millis(config.runtime.demo_wait_ms);

    println!("🎬 Starting oracle network demo against {}", client.base_url());

    let health = client
        .health()
        .await
        .with_context(|| format!("Coordinator is not running on {}", client.base_url()))?;
    println!(
        "✅ Coordinator is running ({} topology, {} workers)",
        health.topology, health.workers
    );

    println!("⏳ Waiting {} for workers to register...", format_duration(pause));
    tokio::time::sleep(pause).await;

    println!("🚀 Submitting {} queries", queries.len());
    for (i, query) in queries.iter().enumerate() {
        println!();
        println!("--- Request {} ---", i + 1);

        match client.submit(query).await {
            Ok(result) => print!("{}", format_result(query, &result)),
            Err(e) => println!("❌ Request failed: {:#}", e),
        }

        if i + 1 < queries.len() {
            tokio::time::sleep(pause).await;
        }
    }

    println!();
    println!("✅ Demo completed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::protocol::WorkerOutcome;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use tokio::net::TcpListener;

    async fn spawn(router: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
        format!("http://{}", addr)
    }

    #[test]
    fn test_format_result() {
        let result = OracleResult {
            request_id: "req-1".into(),
            final_value: 42_000.5,
            worker_responses: vec![
                WorkerOutcome::success("worker-a", "req-1", 42_000.5, Duration::from_millis(120)),
                WorkerOutcome::failure("worker-b", "req-1", "simulated worker failure", Duration::from_millis(80)),
            ],
            reliability_note: "Partial response: 1/2 workers succeeded".into(),
        };

        let text = format_result("BTC/USD", &result);
        assert!(text.contains("Final Value: $42000.50"));
        assert!(text.contains("Workers: 2"));
        assert!(text.contains("✅ worker-a: $42000.50"));
        assert!(text.contains("❌ worker-b: simulated worker failure"));
    }

    #[tokio::test]
    async fn test_submit_surfaces_error_body() {
        let router = Router::new().route(
            "/request",
            post(|| async { ApiError::no_workers_available() }),
        );
        let base = spawn(router).await;

        let err = OracleClient::new(&base).unwrap().submit("BTC/USD").await.unwrap_err();
        assert!(err.to_string().contains("no workers available (503)"));
    }

    #[tokio::test]
    async fn test_health_and_submit() {
        let router = Router::new()
            .route(
                "/health",
                get(|| async {
                    Json(HealthResponse {
                        status: "healthy".into(),
                        workers: 2,
                        topology: "direct".into(),
                        port: 8080,
                    })
                }),
            )
            .route(
                "/request",
                post(|Json(request): Json<OracleRequest>| async move {
                    Json(OracleResult {
                        request_id: request.id.clone(),
                        final_value: 7.0,
                        worker_responses: vec![WorkerOutcome::success(
                            "w1",
                            &request.id,
                            7.0,
                            Duration::from_millis(1),
                        )],
                        reliability_note: "All workers responded successfully".into(),
                    })
                }),
            );
        let base = spawn(router).await;
        let client = OracleClient::new(&format!("{}/", base)).unwrap();

        assert_eq!(client.health().await.unwrap().workers, 2);

        let result = client.submit("ETH/USD").await.unwrap();
        assert!(result.request_id.starts_with("req-"));
        assert_eq!(result.final_value, 7.0);
    }
}
