//! Round reliability
//!
//! Turns the success ratio of one round into a human-readable note and a
//! numeric signal. The breakpoints are fixed:
//!
//! | success rate      | note                                              |
//! |-------------------|---------------------------------------------------|
//! | no outcomes       | `No workers responded`                            |
//! | `>= 0.8`          | `All workers responded successfully`              |
//! | `0.5 ..< 0.8`     | `Partial response: X/Y workers succeeded`         |
//! | `< 0.5`           | `Low reliability: only X/Y workers succeeded`     |
//!
//! The note describes a single round. It is not a per-worker trust score.

use crate::distributed::protocol::WorkerOutcome;
use serde::{Deserialize, Serialize};

pub const NO_WORKERS_NOTE: &str = "No workers responded";
pub const ALL_SUCCEEDED_NOTE: &str = "All workers responded successfully";

/// At or above this rate a round counts as fully successful
pub const HIGH_THRESHOLD: f64 = 0.8;

/// Below this rate a round is flagged as low reliability
pub const PARTIAL_THRESHOLD: f64 = 0.5;

/// Minimum success rate for a worker or round to be called reliable
pub const RELIABLE_THRESHOLD: f64 = 0.7;

/// Numeric and textual summary of one round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReliabilityReport {
    pub successes: usize,
    pub total: usize,
    pub success_rate: f64,
    pub note: String,
}

impl ReliabilityReport {
    /// Success rate meets [`RELIABLE_THRESHOLD`]
    pub fn is_reliable(&self) -> bool {
        is_reliable(self.successes as u64, self.total as u64)
    }
}

/// Summarize a round
pub fn assess(outcomes: &[WorkerOutcome]) -> ReliabilityReport {
    let total = outcomes.len();
    let successes = outcomes.iter().filter(|o| o.is_success()).count();

    if total == 0 {
        return ReliabilityReport {
            successes: 0,
            total: 0,
            success_rate: 0.0,
            note: NO_WORKERS_NOTE.to_string(),
        };
    }

    let success_rate = successes as f64 / total as f64;
    let note = if success_rate >= HIGH_THRESHOLD {
        ALL_SUCCEEDED_NOTE.to_string()
    } else if success_rate >= PARTIAL_THRESHOLD {
        format!("Partial response: {}/{} workers succeeded", successes, total)
    } else {
        format!("Low reliability: only {}/{} workers succeeded", successes, total)
    };

    ReliabilityReport {
        successes,
        total,
        success_rate,
        note,
    }
}

/// Reliability note for a round
pub fn annotate(outcomes: &[WorkerOutcome]) -> String {
    assess(outcomes).note
}

/// True when `successes / total` reaches [`RELIABLE_THRESHOLD`]
///
/// No samples means not reliable.
pub fn is_reliable(successes: u64, total: u64) -> bool {
    total > 0 && successes as f64 / total as f64 >= RELIABLE_THRESHOLD
}
