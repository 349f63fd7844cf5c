//! Worker registry
//!
//! The set of known workers in the direct topology. Workers register (and
//! re-register as a heartbeat) with an id and an HTTP endpoint; a background
//! task evicts records whose last-seen age exceeds a staleness threshold.
//!
//! Rounds never hold the lock while dispatching: [`WorkerRegistry::snapshot`]
//! copies the records out, so a registration or eviction that lands mid-round
//! only affects later rounds.
//!
//! Each record carries a `reliable` flag computed from lifetime success/total
//! counters fed by [`WorkerRegistry::record_round`]. The flag is informational;
//! it never removes a worker from dispatch.

use crate::distributed::protocol::WorkerOutcome;
use crate::stats::reliability::is_reliable;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;

/// A registered worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRecord {
    pub id: String,

    /// Base URL, e.g. `http://10.0.0.5:8081`
    pub endpoint: String,
    pub last_seen: DateTime<Utc>,
    pub reliable: bool,
}

#[derive(Debug)]
struct Entry {
    record: WorkerRecord,
    successes: u64,
    total: u64,
}

/// Concurrent map of worker id to record
#[derive(Debug, Default)]
pub struct WorkerRegistry {
    workers: RwLock<HashMap<String, Entry>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or refresh a worker
    ///
    /// Re-registering an existing id updates its endpoint and last-seen time
    /// and keeps its reliability counters.
    pub fn register(&self, id: &str, endpoint: &str) -> WorkerRecord {
        self.register_at(id, endpoint, Utc::now())
    }

    pub fn register_at(&self, id: &str, endpoint: &str, now: DateTime<Utc>) -> WorkerRecord {
        let mut workers = self.workers.write().unwrap_or_else(PoisonError::into_inner);

        let entry = workers.entry(id.to_string()).or_insert_with(|| Entry {
            record: WorkerRecord {
                id: id.to_string(),
                endpoint: endpoint.to_string(),
                last_seen: now,
                reliable: true,
            },
            successes: 0,
            total: 0,
        });

        if entry.record.endpoint != endpoint {
            log::info!("Worker {} moved from {} to {}", id, entry.record.endpoint, endpoint);
            entry.record.endpoint = endpoint.to_string();
        }
        entry.record.last_seen = now;

        entry.record.clone()
    }

    /// Point-in-time copy of every record, ordered by id
    pub fn snapshot(&self) -> Vec<WorkerRecord> {
        let workers = self.workers.read().unwrap_or_else(PoisonError::into_inner);

        let mut records: Vec<WorkerRecord> = workers.values().map(|e| e.record.clone()).collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    pub fn get(&self, id: &str) -> Option<WorkerRecord> {
        let workers = self.workers.read().unwrap_or_else(PoisonError::into_inner);
        workers.get(id).map(|e| e.record.clone())
    }

    pub fn len(&self) -> usize {
        self.workers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove records not seen within `threshold`; returns the evicted ids
    pub fn evict_stale(&self, threshold: Duration) -> Vec<String> {
        self.evict_stale_at(Utc::now(), threshold)
    }

    pub fn evict_stale_at(&self, now: DateTime<Utc>, threshold: Duration) -> Vec<String> {
        let threshold = chrono::Duration::from_std(threshold)
            .unwrap_or_else(|_| chrono::Duration::days(365 * 100));
        let mut workers = self.workers.write().unwrap_or_else(PoisonError::into_inner);

        let stale: Vec<String> = workers
            .values()
            .filter(|e| now.signed_duration_since(e.record.last_seen) > threshold)
            .map(|e| e.record.id.clone())
            .collect();

        for id in &stale {
            workers.remove(id);
        }

        stale
    }

    /// Fold one round's outcomes into the per-worker counters
    ///
    /// Outcomes for ids no longer registered are ignored.
    pub fn record_round(&self, outcomes: &[WorkerOutcome]) {
        let mut workers = self.workers.write().unwrap_or_else(PoisonError::into_inner);

        for outcome in outcomes {
            if let Some(entry) = workers.get_mut(&outcome.worker_id) {
                entry.total += 1;
                if outcome.is_success() {
                    entry.successes += 1;
                }

                let reliable = is_reliable(entry.successes, entry.total);
                if reliable != entry.record.reliable {
                    log::info!(
                        "Worker {} is now {} ({}/{} successful)",
                        entry.record.id,
                        if reliable { "reliable" } else { "unreliable" },
                        entry.successes,
                        entry.total
                    );
                }
                entry.record.reliable = reliable;
            }
        }
    }

    /// Run [`evict_stale`](Self::evict_stale) every `interval` until the handle is aborted
    pub fn spawn_eviction(
        registry: Arc<WorkerRegistry>,
        interval: Duration,
        threshold: Duration,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                for id in registry.evict_stale(threshold) {
                    log::warn!("Evicted stale worker {} (not seen for over {:?})", id, threshold);
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_register_is_upsert() {
        let registry = WorkerRegistry::new();
        let t0 = Utc::now();

        registry.register_at("worker-1", "http://127.0.0.1:8081", t0);
        let later = t0 + chrono::Duration::seconds(5);
        let record = registry.register_at("worker-1", "http://127.0.0.1:9000", later);

        assert_eq!(registry.len(), 1);
        assert_eq!(record.endpoint, "http://127.0.0.1:9000");
        assert_eq!(record.last_seen, later);
    }

    #[test]
    fn test_snapshot_is_isolated() {
        let registry = WorkerRegistry::new();
        registry.register("worker-b", "http://b");
        registry.register("worker-a", "http://a");

        let snapshot = registry.snapshot();
        registry.register("worker-c", "http://c");

        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].id, "worker-a");
        assert_eq!(snapshot[1].id, "worker-b");
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_evict_stale() {
        let registry = WorkerRegistry::new();
        let t0 = Utc::now();

        registry.register_at("old", "http://old", t0);
        registry.register_at("fresh", "http://fresh", t0 + chrono::Duration::seconds(50));

        let now = t0 + chrono::Duration::seconds(61);
        let evicted = registry.evict_stale_at(now, Duration::from_secs(60));

        assert_eq!(evicted, vec!["old".to_string()]);
        assert!(registry.get("old").is_none());
        assert!(registry.get("fresh").is_some());
    }

    #[test]
    fn test_heartbeat_prevents_eviction() {
        let registry = WorkerRegistry::new();
        let t0 = Utc::now();

        registry.register_at("worker-1", "http://w", t0);
        registry.register_at("worker-1", "http://w", t0 + chrono::Duration::seconds(40));

        let evicted = registry.evict_stale_at(t0 + chrono::Duration::seconds(70), Duration::from_secs(60));
        assert!(evicted.is_empty());
    }

    #[test]
    fn test_record_round_updates_reliability() {
        let registry = WorkerRegistry::new();
        registry.register("good", "http://good");
        registry.register("bad", "http://bad");

        for _ in 0..4 {
            registry.record_round(&[
                WorkerOutcome::success("good", "r", 1.0, Duration::ZERO),
                WorkerOutcome::failure("bad", "r", "timeout", Duration::ZERO),
                WorkerOutcome::failure("ghost", "r", "timeout", Duration::ZERO),
            ]);
        }

        assert!(registry.get("good").unwrap().reliable);
        assert!(!registry.get("bad").unwrap().reliable);
        assert!(registry.get("ghost").is_none());
        // Unreliable workers stay registered
        assert_eq!(registry.snapshot().len(), 2);
    }

    #[test]
    fn test_new_worker_is_reliable() {
        let registry = WorkerRegistry::new();
        assert!(registry.register("worker-1", "http://w").reliable);
    }

    #[test]
    fn test_record_serializes_rfc3339() {
        let registry = WorkerRegistry::new();
        let record = registry.register("worker-1", "http://w");
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["id"], "worker-1");
        assert_eq!(json["endpoint"], "http://w");
        assert!(json["last_seen"].as_str().unwrap().contains('T'));
        assert_eq!(json["reliable"], true);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawn_eviction_runs_periodically() {
        let registry = Arc::new(WorkerRegistry::new());
        let stale_at = Utc::now() - chrono::Duration::seconds(120);
        registry.register_at("stale", "http://s", stale_at);

        let handle = WorkerRegistry::spawn_eviction(
            Arc::clone(&registry),
            Duration::from_secs(30),
            Duration::from_secs(60),
        );

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(registry.is_empty());
        handle.abort();
    }
}
