//! OracleNet - oracle network coordinator
//!
//! OracleNet answers data queries (e.g. `BTC/USD`) by asking a pool of
//! independent workers and combining what comes back before a deadline.
//!
//! # Architecture
//!
//! - **Two topologies**: direct HTTP fan-out over a worker registry, or a
//!   publish/subscribe bus with request-id correlated replies
//! - **Deadline-bounded rounds**: slow workers are left behind, never waited on
//! - **Aggregation**: average, median or majority over successful values
//! - **Reliability notes**: every result says how much of the pool answered
//! - **Processes**: coordinator, worker node, TCP broker and a demo client

pub mod api;
pub mod bus;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod distributed;
pub mod error;
pub mod registry;
pub mod stats;
pub mod util;
pub mod worker;

// Re-export commonly used types
pub use config::Config;
pub use distributed::coordinator::{OracleCoordinator, RoundSettings};
pub use distributed::protocol::{OracleRequest, OracleResult, WorkerOutcome};
pub use error::{OracleError, WorkerFailure};
pub use stats::AggregationStrategy;

/// Result type used throughout OracleNet
pub type Result<T> = anyhow::Result<T>;
