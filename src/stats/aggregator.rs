//! Value aggregation
//!
//! Reduces the successful values of one round into a single scalar.
//!
//! # Strategies
//!
//! - **average**: arithmetic mean
//! - **median**: middle element, or mean of the two middle elements for even counts
//! - **majority**: most frequent value after rounding to the nearest integer
//!
//! Only outcomes without an `err` contribute. An empty successful set yields
//! `0.0`; callers distinguish "zero" from "no data" through the outcomes and
//! the reliability note, never through the value.
//!
//! # Example
//!
//! ```
//! use oraclenet::distributed::protocol::WorkerOutcome;
//! use oraclenet::stats::aggregator::{aggregate, AggregationStrategy};
//! use std::time::Duration;
//!
//! let outcomes = vec![
//!     WorkerOutcome::success("w1", "req-1", 10.0, Duration::ZERO),
//!     WorkerOutcome::success("w2", "req-1", 30.0, Duration::ZERO),
//!     WorkerOutcome::failure("w3", "req-1", "timeout", Duration::ZERO),
//! ];
//!
//! assert_eq!(aggregate(&outcomes, AggregationStrategy::Average), 20.0);
//! ```

use crate::distributed::protocol::WorkerOutcome;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Aggregation strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AggregationStrategy {
    /// Arithmetic mean (default)
    #[default]
    Average,
    Median,
    Majority,
}

impl AggregationStrategy {
    /// Resolve a strategy name
    ///
    /// Unknown names fall back to `Average`, matching how the coordinator
    /// treats an unrecognized strategy in its configuration.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "median" => AggregationStrategy::Median,
            "majority" => AggregationStrategy::Majority,
            "average" | "avg" | "mean" => AggregationStrategy::Average,
            other => {
                log::warn!("Unknown aggregation strategy '{}', using average", other);
                AggregationStrategy::Average
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AggregationStrategy::Average => "average",
            AggregationStrategy::Median => "median",
            AggregationStrategy::Majority => "majority",
        }
    }
}

impl fmt::Display for AggregationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for AggregationStrategy {
    fn from(name: String) -> Self {
        AggregationStrategy::from_name(&name)
    }
}

impl From<AggregationStrategy> for String {
    fn from(strategy: AggregationStrategy) -> Self {
        strategy.as_str().to_string()
    }
}

/// Reduce the successful outcomes of a round to one value
pub fn aggregate(outcomes: &[WorkerOutcome], strategy: AggregationStrategy) -> f64 {
    let values: Vec<f64> = outcomes
        .iter()
        .filter(|o| o.is_success())
        .map(|o| o.value)
        .collect();

    if values.is_empty() {
        return 0.0;
    }

    match strategy {
        AggregationStrategy::Average => average(&values),
        AggregationStrategy::Median => median(values),
        AggregationStrategy::Majority => majority(&values),
    }
}

fn average(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn median(mut values: Vec<f64>) -> f64 {
    values.sort_by(|a, b| a.total_cmp(b));

    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

/// Most frequent rounded bucket; ties go to the smallest bucket
fn majority(values: &[f64]) -> f64 {
    let mut buckets: BTreeMap<i64, usize> = BTreeMap::new();
    for value in values {
        *buckets.entry(value.round() as i64).or_insert(0) += 1;
    }

    let mut best: Option<(i64, usize)> = None;
    for (&bucket, &count) in &buckets {
        // Ascending iteration: strictly greater keeps the smaller bucket on ties
        if best.map_or(true, |(_, best_count)| count > best_count) {
            best = Some((bucket, count));
        }
    }

    best.map(|(bucket, _)| bucket as f64).unwrap_or(0.0)
}
