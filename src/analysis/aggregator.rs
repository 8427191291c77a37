//! Review aggregation and rating statistics.
//!
//! This module provides the pure statistics over a review set and the
//! store-backed aggregator the coordinator uses to load them.

use std::sync::Arc;

use crate::error::StoreError;
use crate::models::{RatingStats, Review};
use crate::store::ReviewStore;

/// Compute count and mean rating over the given (visible) reviews.
///
/// Returns `average: None` for an empty set instead of dividing by zero.
pub fn compute_stats(reviews: &[Review]) -> RatingStats {
    let count = reviews.len() as u64;
    if count == 0 {
        return RatingStats {
            count: 0,
            average: None,
        };
    }

    let sum: u64 = reviews.iter().map(|r| u64::from(r.rating)).sum();
    RatingStats {
        count,
        average: Some(sum as f64 / count as f64),
    }
}

/// Count reviews per star, index 0 holding 1-star reviews.
///
/// Ratings outside 1..=5 are left out.
pub fn rating_distribution(reviews: &[Review]) -> [u64; 5] {
    let mut dist = [0u64; 5];

    for review in reviews {
        if (1..=5).contains(&review.rating) {
            dist[usize::from(review.rating - 1)] += 1;
        }
    }

    dist
}

/// The `n` most recent reviews, newest first.
pub fn most_recent(reviews: &[Review], n: usize) -> Vec<Review> {
    let mut sorted: Vec<Review> = reviews.to_vec();
    sorted.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    sorted.truncate(n);
    sorted
}

/// Generate a one-line text summary of the distribution, e.g.
/// `5★ 2 | 4★ 1 | 3★ 0 | 2★ 0 | 1★ 0`.
pub fn distribution_summary(dist: &[u64; 5]) -> String {
    (1..=5)
        .rev()
        .map(|star| format!("{}★ {}", star, dist[star - 1]))
        .collect::<Vec<_>>()
        .join(" | ")
}

/// Visible reviews of one entity together with their statistics.
#[derive(Debug, Clone)]
pub struct ReviewSnapshot {
    pub reviews: Vec<Review>,
    pub stats: RatingStats,
}

/// Loads reviews from the review store and derives statistics from them.
#[derive(Clone)]
pub struct StatsAggregator {
    reviews: Arc<dyn ReviewStore>,
}

impl StatsAggregator {
    pub fn new(reviews: Arc<dyn ReviewStore>) -> Self {
        Self { reviews }
    }

    /// Rating statistics over the entity's visible reviews.
    pub async fn compute_stats(&self, entity_id: &str) -> Result<RatingStats, StoreError> {
        Ok(self.snapshot(entity_id).await?.stats)
    }

    /// Visible reviews plus their statistics, read in one store call so the
    /// two always describe the same review set.
    pub async fn snapshot(&self, entity_id: &str) -> Result<ReviewSnapshot, StoreError> {
        let reviews = self.reviews.find_visible_by_entity(entity_id).await?;
        let stats = compute_stats(&reviews);
        Ok(ReviewSnapshot { reviews, stats })
    }
}
