//! Oracle coordinator
//!
//! The single entry point for submitting a query to the oracle network. A
//! round runs through the same steps in either topology:
//!
//! 1. Validate the request and assign a request id if it has none
//! 2. Set up the round's correlation (registry snapshot, or mailbox entry)
//! 3. Dispatch and collect until the window closes
//! 4. Aggregate the successful values and annotate reliability
//! 5. Release the correlation and return the composed result
//!
//! `submit_request` is safe to call concurrently. Direct rounds correlate
//! through a channel owned by the round; bus rounds through a mailbox entry
//! keyed by request id, claimed before the task is published.

use crate::bus::{Mailbox, MessageBus, Subjects};
use crate::dispatch::{collect_replies, Collected, Dispatcher, RoundContext};
use crate::distributed::protocol::*;
use crate::error::OracleError;
use crate::registry::WorkerRegistry;
use crate::stats::aggregator::{aggregate, AggregationStrategy};
use crate::stats::reliability::assess;
use crate::util::ids::generate_request_id;
use crate::util::time::format_duration;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Per-round parameters
#[derive(Debug, Clone, PartialEq)]
pub struct RoundSettings {
    pub round_timeout: Duration,
    pub strategy: AggregationStrategy,
}

impl Default for RoundSettings {
    fn default() -> Self {
        Self {
            round_timeout: Duration::from_secs(3),
            strategy: AggregationStrategy::Average,
        }
    }
}

enum Topology {
    Direct {
        registry: Arc<WorkerRegistry>,
        dispatcher: Dispatcher,
    },
    Bus {
        bus: Arc<dyn MessageBus>,
        subjects: Subjects,
        mailbox: Mailbox,
        router: JoinHandle<()>,
    },
}

/// Coordinator façade
pub struct OracleCoordinator {
    topology: Topology,
    settings: RoundSettings,
}

impl OracleCoordinator {
    /// Coordinator over a worker registry
    pub fn direct(registry: Arc<WorkerRegistry>, dispatcher: Dispatcher, settings: RoundSettings) -> Self {
        Self {
            topology: Topology::Direct { registry, dispatcher },
            settings,
        }
    }

    /// Coordinator over a message bus
    ///
    /// Subscribes to the result subject and starts the reply router.
    pub async fn bus(
        bus: Arc<dyn MessageBus>,
        subjects: Subjects,
        settings: RoundSettings,
    ) -> Result<Self> {
        let results = bus
            .subscribe(&subjects.results)
            .await
            .with_context(|| format!("Failed to subscribe to {}", subjects.results))?;

        let mailbox = Mailbox::new();
        let router = mailbox.spawn_router(results);

        Ok(Self {
            topology: Topology::Bus {
                bus,
                subjects,
                mailbox,
                router,
            },
            settings,
        })
    }

    pub fn settings(&self) -> &RoundSettings {
        &self.settings
    }

    pub fn topology_name(&self) -> &'static str {
        match self.topology {
            Topology::Direct { .. } => "direct",
            Topology::Bus { .. } => "bus",
        }
    }

    /// The worker registry (direct topology only)
    pub fn registry(&self) -> Option<&Arc<WorkerRegistry>> {
        match &self.topology {
            Topology::Direct { registry, .. } => Some(registry),
            Topology::Bus { .. } => None,
        }
    }

    /// Registered workers; the bus topology does not track workers
    pub fn worker_count(&self) -> usize {
        match &self.topology {
            Topology::Direct { registry, .. } => registry.len(),
            Topology::Bus { .. } => 0,
        }
    }

    /// Bus rounds currently holding a reply route; always 0 for direct
    pub fn in_flight_rounds(&self) -> usize {
        match &self.topology {
            Topology::Direct { .. } => 0,
            Topology::Bus { mailbox, .. } => mailbox.in_flight(),
        }
    }

    /// Add or refresh a worker (direct topology only)
    pub fn register_worker(&self, request: &RegisterRequest) -> Result<RegisterResponse, OracleError> {
        let Topology::Direct { registry, .. } = &self.topology else {
            return Err(OracleError::Unsupported(
                "worker registration is not used with the bus topology".to_string(),
            ));
        };

        if request.id.trim().is_empty() {
            return Err(OracleError::InvalidRequest("worker id must not be empty".to_string()));
        }
        if request.endpoint.trim().is_empty() {
            return Err(OracleError::InvalidRequest("worker endpoint must not be empty".to_string()));
        }

        let is_new = registry.get(&request.id).is_none();
        registry.register(&request.id, &request.endpoint);
        if is_new {
            log::info!("👷 Worker {} registered at {}", request.id, request.endpoint);
        } else {
            log::debug!("Worker {} refreshed", request.id);
        }

        Ok(RegisterResponse::registered(&request.id))
    }

    /// Run one round for `request`
    pub async fn submit_request(
        &self,
        ctx: &RoundContext,
        mut request: OracleRequest,
    ) -> Result<OracleResult, OracleError> {
        if request.query.trim().is_empty() {
            return Err(OracleError::InvalidRequest("query must not be empty".to_string()));
        }
        if request.id.trim().is_empty() {
            request.id = generate_request_id();
        }

        let collected = match &self.topology {
            Topology::Direct { registry, dispatcher } => {
                let targets = registry.snapshot();
                if targets.is_empty() {
                    log::warn!("Round {} rejected: no workers registered", request.id);
                    return Err(OracleError::NoWorkersAvailable);
                }

                log::info!(
                    "🎯 Round {} ({}) dispatched to {} workers",
                    request.id,
                    request.query,
                    targets.len()
                );
                let collected = dispatcher
                    .dispatch(ctx, &targets, &request, self.settings.round_timeout)
                    .await;
                registry.record_round(&collected.outcomes);
                collected
            }
            Topology::Bus {
                bus,
                subjects,
                mailbox,
                router,
            } => {
                if router.is_finished() {
                    return Err(OracleError::BusUnavailable("result subscription closed".to_string()));
                }

                // Claimed before publishing so no reply can arrive unrouted
                let mut guard = mailbox.open(&request.id)?;

                let published = match encode_payload(&request) {
                    Ok(payload) => bus.publish(&subjects.tasks, payload).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = published {
                    log::error!("❌ Round {} could not be published: {:#}", request.id, e);
                    return Ok(OracleResult::dispatch_failed(&request.id, format!("{:#}", e)));
                }

                log::info!("🎯 Round {} ({}) published on {}", request.id, request.query, subjects.tasks);
                collect_replies(ctx, &mut guard, self.settings.round_timeout).await
            }
        };

        Ok(self.compose(request.id, collected))
    }

    fn compose(&self, request_id: String, collected: Collected) -> OracleResult {
        let final_value = aggregate(&collected.outcomes, self.settings.strategy);
        let report = assess(&collected.outcomes);

        log::info!(
            "✅ Round {} final value {:.4} ({} of {}, {}) in {}",
            request_id,
            final_value,
            report.successes,
            report.total,
            self.settings.strategy,
            format_duration(collected.elapsed)
        );

        OracleResult {
            request_id,
            final_value,
            worker_responses: collected.outcomes,
            reliability_note: report.note,
        }
    }
}

impl Drop for OracleCoordinator {
    fn drop(&mut self) {
        if let Topology::Bus { router, .. } = &self.topology {
            router.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::LocalBus;
    use crate::worker::mock::{MockBehavior, MockWorkerProxy};

    fn direct_coordinator(strategy: AggregationStrategy) -> (Arc<MockWorkerProxy>, OracleCoordinator) {
        let proxy = Arc::new(MockWorkerProxy::new());
        let registry = Arc::new(WorkerRegistry::new());
        let settings = RoundSettings {
            round_timeout: Duration::from_secs(3),
            strategy,
        };
        let coordinator = OracleCoordinator::direct(registry, Dispatcher::new(proxy.clone()), settings);
        (proxy, coordinator)
    }

    fn register(coordinator: &OracleCoordinator, ids: &[&str]) {
        for id in ids {
            coordinator
                .register_worker(&RegisterRequest {
                    id: id.to_string(),
                    endpoint: format!("mock://{}", id),
                })
                .unwrap();
        }
    }

    /// Answers every task on the bus with `base + worker index`
    async fn spawn_bus_responders(bus: Arc<LocalBus>, subjects: Subjects, count: usize) {
        for index in 0..count {
            let mut tasks = bus.subscribe(&subjects.tasks).await.unwrap();
            let bus = Arc::clone(&bus);
            let results = subjects.results.clone();
            tokio::spawn(async move {
                while let Some(payload) = tasks.next().await {
                    let request: OracleRequest = decode_payload(&payload).unwrap();
                    let base = if request.query == "A" { 100.0 } else { 200.0 };
                    let outcome = WorkerOutcome::success(
                        format!("bus-worker-{}", index),
                        &request.id,
                        base + index as f64,
                        Duration::from_millis(1),
                    );
                    bus.publish(&results, encode_payload(&outcome).unwrap()).await.unwrap();
                }
            });
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_direct_round_end_to_end() {
        let (proxy, coordinator) = direct_coordinator(AggregationStrategy::Average);
        register(&coordinator, &["w1", "w2", "w3"]);
        proxy.set_behavior("w1", MockBehavior::value(100.0));
        proxy.set_behavior("w2", MockBehavior::value(102.0));
        proxy.set_behavior("w3", MockBehavior::value(104.0));

        let result = coordinator
            .submit_request(&RoundContext::background(), OracleRequest::new("BTC/USD"))
            .await
            .unwrap();

        assert!(result.request_id.starts_with("req-"));
        assert_eq!(result.final_value, 102.0);
        assert_eq!(result.worker_responses.len(), 3);
        assert_eq!(result.reliability_note, "All workers responded successfully");
        assert!(result.worker_responses.iter().all(|o| o.request_id == result.request_id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_direct_round_keeps_caller_id() {
        let (_, coordinator) = direct_coordinator(AggregationStrategy::Median);
        register(&coordinator, &["w1"]);

        let result = coordinator
            .submit_request(&RoundContext::background(), OracleRequest::with_id("req-mine", "ETH/USD"))
            .await
            .unwrap();
        assert_eq!(result.request_id, "req-mine");
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_round_with_slow_and_failing_workers() {
        let (proxy, coordinator) = direct_coordinator(AggregationStrategy::Median);
        register(&coordinator, &["w1", "w2", "w3", "w4"]);
        proxy.set_behavior("w1", MockBehavior::value(10.0));
        proxy.set_behavior("w2", MockBehavior::value(30.0));
        proxy.set_behavior("w3", MockBehavior::failing("simulated worker failure"));
        proxy.set_behavior("w4", MockBehavior::value(20.0).delayed(Duration::from_secs(10)));

        let result = coordinator
            .submit_request(&RoundContext::background(), OracleRequest::new("SOL/USD"))
            .await
            .unwrap();

        assert_eq!(result.worker_responses.len(), 3);
        assert_eq!(result.final_value, 20.0);
        assert_eq!(result.reliability_note, "Partial response: 2/3 workers succeeded");
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_failures_yield_zero_sentinel() {
        let (proxy, coordinator) = direct_coordinator(AggregationStrategy::Average);
        register(&coordinator, &["w1", "w2"]);
        proxy.set_default_behavior(MockBehavior::failing("HTTP request failed: refused"));

        let result = coordinator
            .submit_request(&RoundContext::background(), OracleRequest::new("BTC/USD"))
            .await
            .unwrap();

        assert_eq!(result.final_value, 0.0);
        assert!(!result.has_data());
        assert_eq!(result.reliability_note, "Low reliability: only 0/2 workers succeeded");
        // Failures feed the per-worker reliability counters
        assert!(!coordinator.registry().unwrap().get("w1").unwrap().reliable);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_workers_and_empty_query() {
        let (_, coordinator) = direct_coordinator(AggregationStrategy::Average);

        let err = coordinator
            .submit_request(&RoundContext::background(), OracleRequest::new("BTC/USD"))
            .await
            .unwrap_err();
        assert_eq!(err, OracleError::NoWorkersAvailable);

        register(&coordinator, &["w1"]);
        let err = coordinator
            .submit_request(&RoundContext::background(), OracleRequest::new("   "))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_request");
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_direct_rounds_are_isolated() {
        let (proxy, coordinator) = direct_coordinator(AggregationStrategy::Average);
        register(&coordinator, &["w1", "w2"]);
        proxy.set_default_behavior(MockBehavior::value(5.0).delayed(Duration::from_millis(300)));

        let ctx = RoundContext::background();
        let (a, b) = tokio::join!(
            coordinator.submit_request(&ctx, OracleRequest::with_id("req-a", "BTC/USD")),
            coordinator.submit_request(&ctx, OracleRequest::with_id("req-b", "ETH/USD")),
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(a.worker_responses.len(), 2);
        assert_eq!(b.worker_responses.len(), 2);
        assert!(a.worker_responses.iter().all(|o| o.request_id == "req-a"));
        assert!(b.worker_responses.iter().all(|o| o.request_id == "req-b"));
        assert_eq!(proxy.call_count(), 4);
    }

    #[tokio::test]
    async fn test_register_validation() {
        let (_, coordinator) = direct_coordinator(AggregationStrategy::Average);

        let response = coordinator
            .register_worker(&RegisterRequest { id: "w1".into(), endpoint: "http://w1".into() })
            .unwrap();
        assert_eq!(response.status, "registered");
        assert_eq!(coordinator.worker_count(), 1);

        let err = coordinator
            .register_worker(&RegisterRequest { id: "".into(), endpoint: "http://x".into() })
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[tokio::test]
    async fn test_bus_rounds_are_isolated() {
        let bus = Arc::new(LocalBus::new());
        let subjects = Subjects::default();
        spawn_bus_responders(Arc::clone(&bus), subjects.clone(), 3).await;

        let settings = RoundSettings {
            round_timeout: Duration::from_millis(300),
            strategy: AggregationStrategy::Average,
        };
        let coordinator = OracleCoordinator::bus(bus.clone(), subjects, settings)
            .await
            .unwrap();

        let ctx = RoundContext::background();
        let (a, b) = tokio::join!(
            coordinator.submit_request(&ctx, OracleRequest::with_id("req-a", "A")),
            coordinator.submit_request(&ctx, OracleRequest::with_id("req-b", "B")),
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(a.worker_responses.len(), 3);
        assert_eq!(b.worker_responses.len(), 3);
        assert!(a.worker_responses.iter().all(|o| o.request_id == "req-a" && o.value < 200.0));
        assert!(b.worker_responses.iter().all(|o| o.request_id == "req-b" && o.value >= 200.0));
        assert_eq!(a.final_value, 101.0);
        assert_eq!(b.final_value, 201.0);
    }

    #[tokio::test]
    async fn test_bus_duplicate_in_flight_id() {
        let bus = Arc::new(LocalBus::new());
        let settings = RoundSettings {
            round_timeout: Duration::from_millis(200),
            strategy: AggregationStrategy::Average,
        };
        let coordinator = OracleCoordinator::bus(bus, Subjects::default(), settings)
            .await
            .unwrap();

        let ctx = RoundContext::background();
        let (first, second) = tokio::join!(
            coordinator.submit_request(&ctx, OracleRequest::with_id("req-dup", "A")),
            coordinator.submit_request(&ctx, OracleRequest::with_id("req-dup", "A")),
        );

        assert_eq!(first.unwrap().reliability_note, "No workers responded");
        assert_eq!(second.unwrap_err(), OracleError::DuplicateRequest("req-dup".to_string()));
    }

    #[tokio::test]
    async fn test_bus_round_keeps_every_reply_from_a_large_fleet() {
        let bus = Arc::new(LocalBus::new());
        let subjects = Subjects::default();
        spawn_bus_responders(Arc::clone(&bus), subjects.clone(), 100).await;

        let settings = RoundSettings {
            round_timeout: Duration::from_millis(500),
            strategy: AggregationStrategy::Median,
        };
        let coordinator = OracleCoordinator::bus(bus, subjects, settings).await.unwrap();

        let result = coordinator
            .submit_request(&RoundContext::background(), OracleRequest::with_id("req-fleet", "A"))
            .await
            .unwrap();

        assert_eq!(result.worker_responses.len(), 100);
        assert_eq!(result.reliability_note, "All workers responded successfully");
        // Values are 100..=199, so the median sits between 149 and 150
        assert_eq!(result.final_value, 149.5);
    }

    #[tokio::test]
    async fn test_bus_route_released_after_deadline() {
        let bus = Arc::new(LocalBus::new());
        let subjects = Subjects::default();
        spawn_bus_responders(Arc::clone(&bus), subjects.clone(), 2).await;

        let settings = RoundSettings {
            round_timeout: Duration::from_millis(100),
            strategy: AggregationStrategy::Average,
        };
        let coordinator = OracleCoordinator::bus(bus, subjects, settings).await.unwrap();
        let ctx = RoundContext::background();

        let first = coordinator
            .submit_request(&ctx, OracleRequest::with_id("req-same", "A"))
            .await
            .unwrap();
        assert_eq!(first.worker_responses.len(), 2);
        assert_eq!(coordinator.in_flight_rounds(), 0);

        // The id is free again once its round has closed
        let second = coordinator
            .submit_request(&ctx, OracleRequest::with_id("req-same", "B"))
            .await
            .unwrap();
        assert_eq!(second.worker_responses.len(), 2);
        assert!(second.worker_responses.iter().all(|o| o.value >= 200.0));
        assert_eq!(coordinator.in_flight_rounds(), 0);
    }

    #[tokio::test]
    async fn test_bus_round_cancelled_by_caller() {
        let bus = Arc::new(LocalBus::new());
        let settings = RoundSettings {
            round_timeout: Duration::from_secs(30),
            strategy: AggregationStrategy::Average,
        };
        let coordinator = OracleCoordinator::bus(bus, Subjects::default(), settings).await.unwrap();

        let (ctx, cancel) = RoundContext::background().cancellable();
        let round = coordinator.submit_request(&ctx, OracleRequest::with_id("req-cancel", "A"));
        let trigger = async {
            while coordinator.in_flight_rounds() == 0 {
                tokio::task::yield_now().await;
            }
            cancel.cancel();
        };

        let (result, ()) = tokio::time::timeout(Duration::from_secs(2), async { tokio::join!(round, trigger) })
            .await
            .unwrap();
        let result = result.unwrap();

        assert!(result.worker_responses.is_empty());
        assert_eq!(result.reliability_note, "No workers responded");
        assert_eq!(coordinator.in_flight_rounds(), 0);
        let short = RoundContext::with_timeout(Duration::from_millis(10));
        assert!(coordinator
            .submit_request(&short, OracleRequest::with_id("req-cancel", "A"))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_bus_route_released_when_caller_gives_up() {
        let bus = Arc::new(LocalBus::new());
        let settings = RoundSettings {
            round_timeout: Duration::from_secs(30),
            strategy: AggregationStrategy::Average,
        };
        let coordinator = OracleCoordinator::bus(bus, Subjects::default(), settings).await.unwrap();

        let abandoned = tokio::time::timeout(
            Duration::from_millis(50),
            coordinator.submit_request(&RoundContext::background(), OracleRequest::with_id("req-gone", "A")),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(coordinator.in_flight_rounds(), 0);
    }

    /// Accepts subscriptions but refuses every publish
    struct PublishFailsBus {
        inner: LocalBus,
    }

    #[async_trait::async_trait]
    impl MessageBus for PublishFailsBus {
        async fn publish(&self, _subject: &str, _payload: Vec<u8>) -> crate::Result<()> {
            anyhow::bail!("connection reset by broker")
        }

        async fn subscribe(&self, subject: &str) -> crate::Result<crate::bus::Subscription> {
            self.inner.subscribe(subject).await
        }
    }

    #[tokio::test]
    async fn test_bus_publish_failure_is_degraded_result() {
        let bus = Arc::new(PublishFailsBus { inner: LocalBus::new() });
        let coordinator = OracleCoordinator::bus(bus, Subjects::default(), RoundSettings::default())
            .await
            .unwrap();

        let result = coordinator
            .submit_request(&RoundContext::background(), OracleRequest::with_id("req-x", "BTC/USD"))
            .await
            .unwrap();

        assert_eq!(result.request_id, "req-x");
        assert_eq!(result.final_value, 0.0);
        assert!(result.worker_responses.is_empty());
        assert_eq!(result.reliability_note, "Dispatch failed: connection reset by broker");
        assert_eq!(coordinator.in_flight_rounds(), 0);

        // A failed publish does not keep the id claimed
        let retry = coordinator
            .submit_request(&RoundContext::background(), OracleRequest::with_id("req-x", "BTC/USD"))
            .await
            .unwrap();
        assert!(retry.is_dispatch_failure());
    }

    #[tokio::test]
    async fn test_bus_closed_result_subscription() {
        let bus = Arc::new(LocalBus::new());
        let coordinator = OracleCoordinator::bus(bus.clone(), Subjects::default(), RoundSettings::default())
            .await
            .unwrap();

        bus.close();
        // Let the router observe the closed subscription
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        let err = coordinator
            .submit_request(&RoundContext::background(), OracleRequest::new("BTC/USD"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "bus_unavailable");
    }

    #[tokio::test]
    async fn test_bus_register_is_unsupported() {
        let coordinator = OracleCoordinator::bus(
            Arc::new(LocalBus::new()),
            Subjects::default(),
            RoundSettings::default(),
        )
        .await
        .unwrap();

        let err = coordinator
            .register_worker(&RegisterRequest { id: "w".into(), endpoint: "http://w".into() })
            .unwrap_err();
        assert_eq!(err.kind(), "unsupported");
        assert!(coordinator.registry().is_none());
        assert_eq!(coordinator.topology_name(), "bus");
    }
}
