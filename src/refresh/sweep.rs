//! Scheduled sweep over every entity.
//!
//! Runs an unforced (or forced) refresh for each entity with bounded
//! concurrency. A failing entity is recorded and the sweep moves on.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::time::Instant;
use tracing::{info, warn};

use super::coordinator::RefreshCoordinator;
use crate::error::RefreshError;
use crate::models::{EntityId, RefreshOutcome};

/// Options for one sweep.
#[derive(Debug, Clone)]
pub struct SweepOptions {
    /// Recompute every entity regardless of freshness.
    pub force: bool,
    /// Refreshes running at the same time.
    pub concurrency: usize,
    /// Whether to show a progress bar.
    pub show_progress: bool,
}

impl Default for SweepOptions {
    fn default() -> Self {
        Self {
            force: false,
            concurrency: 4,
            show_progress: false,
        }
    }
}

/// Result of refreshing one entity during a sweep.
#[derive(Debug, Clone)]
pub struct SweepEntry {
    pub entity_id: EntityId,
    pub result: Result<RefreshOutcome, RefreshError>,
    pub duration_seconds: f64,
}

/// Counts per outcome kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepCounts {
    pub total: usize,
    pub refreshed: usize,
    pub cached: usize,
    pub in_progress: usize,
    pub superseded: usize,
    pub failed: usize,
}

impl SweepCounts {
    /// Tally the given entries.
    pub fn from_entries(entries: &[SweepEntry]) -> Self {
        let mut counts = Self {
            total: entries.len(),
            ..Self::default()
        };

        for entry in entries {
            match &entry.result {
                Ok(RefreshOutcome::Refreshed { .. }) => counts.refreshed += 1,
                Ok(RefreshOutcome::Cached(_)) => counts.cached += 1,
                Ok(RefreshOutcome::InProgress { .. }) => counts.in_progress += 1,
                Ok(RefreshOutcome::Superseded(_)) => counts.superseded += 1,
                Err(_) => counts.failed += 1,
            }
        }

        counts
    }
}

/// Everything a sweep did.
#[derive(Debug, Clone)]
pub struct SweepSummary {
    pub started_at: DateTime<Utc>,
    pub duration_seconds: f64,
    /// Entries sorted by entity id.
    pub entries: Vec<SweepEntry>,
    pub counts: SweepCounts,
}

impl SweepSummary {
    pub fn failures(&self) -> impl Iterator<Item = (&EntityId, &RefreshError)> {
        self.entries
            .iter()
            .filter_map(|e| e.result.as_ref().err().map(|err| (&e.entity_id, err)))
    }
}

/// Refresh every entity known to the coordinator's entity store.
pub async fn sweep(
    coordinator: &RefreshCoordinator,
    options: &SweepOptions,
) -> Result<SweepSummary, RefreshError> {
    let started_at = Utc::now();
    let start = Instant::now();

    let ids = coordinator.entity_ids().await?;
    info!(
        "Sweeping {} entities (force: {}, concurrency: {})",
        ids.len(),
        options.force,
        options.concurrency
    );

    let progress_bar = if options.show_progress {
        let pb = ProgressBar::new(ids.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        Some(pb)
    } else {
        None
    };

    let mut entries: Vec<SweepEntry> = stream::iter(ids)
        .map(|entity_id| {
            let progress_bar = progress_bar.clone();
            async move {
                let entry_start = Instant::now();
                let result = coordinator.refresh(&entity_id, options.force, false).await;
                if let Err(e) = &result {
                    warn!(
                        entity_id = %entity_id,
                        error = %e,
                        retryable = e.is_retryable(),
                        "Sweep refresh failed"
                    );
                }
                if let Some(pb) = &progress_bar {
                    pb.inc(1);
                }
                SweepEntry {
                    entity_id,
                    result,
                    duration_seconds: entry_start.elapsed().as_secs_f64(),
                }
            }
        })
        .buffer_unordered(options.concurrency.max(1))
        .collect()
        .await;

    if let Some(pb) = progress_bar {
        pb.finish_with_message("Sweep complete");
    }

    entries.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
    let counts = SweepCounts::from_entries(&entries);

    info!(
        "Sweep finished: {} refreshed, {} cached, {} in progress, {} superseded, {} failed",
        counts.refreshed, counts.cached, counts.in_progress, counts.superseded, counts.failed
    );

    Ok(SweepSummary {
        started_at,
        duration_seconds: start.elapsed().as_secs_f64(),
        entries,
        counts,
    })
}
