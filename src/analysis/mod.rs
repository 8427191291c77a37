//! Review statistics.
//!
//! Rating aggregation over visible reviews, used both to decide staleness
//! and to feed the analysis engine.

pub mod aggregator;

pub use aggregator::*;
