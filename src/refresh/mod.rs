//! AI analysis refresh pipeline.
//!
//! - `lease`: per-entity in-flight tokens with TTL takeover
//! - `coordinator`: staleness, dedup, engine call and compare-and-set write
//! - `sweep`: the scheduled refresh over all entities

pub mod coordinator;
pub mod lease;
pub mod sweep;

#[cfg(test)]
pub(crate) mod testing;

pub use coordinator::{RefreshCoordinator, RefreshPolicy};
pub use sweep::{sweep, SweepCounts, SweepEntry, SweepOptions, SweepSummary};
