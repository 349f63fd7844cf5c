//! Round statistics
//!
//! Everything computed after a round's collection window closes:
//!
//! - **aggregator**: reduces successful values to the final value
//! - **reliability**: success-ratio note and the reliable/unreliable signal

pub mod aggregator;
pub mod reliability;

pub use aggregator::{aggregate, AggregationStrategy};
pub use reliability::{annotate, assess, is_reliable, ReliabilityReport};
