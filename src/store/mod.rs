//! Review and entity record stores.
//!
//! The coordinator only sees these traits; `MemoryStore` is the bundled
//! implementation backed by a JSON snapshot file.

pub mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::models::{AiAnalysis, Entity, EntityId, RatingStats, Review};

/// Read access to reviews.
#[async_trait]
pub trait ReviewStore: Send + Sync {
    /// All non-hidden reviews of one entity.
    async fn find_visible_by_entity(&self, entity_id: &str) -> Result<Vec<Review>, StoreError>;
}

/// Access to the persisted entity records.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Loads an entity, failing with `EntityNotFound` if it does not exist.
    async fn get(&self, entity_id: &str) -> Result<Entity, StoreError>;

    /// Writes new stats and analysis only if the stored `computedAt` still
    /// equals `expected_computed_at` and the new `computedAt` is strictly
    /// newer than the stored one. Returns `false` when the write lost.
    async fn compare_and_set_analysis(
        &self,
        entity_id: &str,
        expected_computed_at: Option<DateTime<Utc>>,
        stats: RatingStats,
        analysis: AiAnalysis,
    ) -> Result<bool, StoreError>;

    /// Ids of every entity, in a stable order.
    async fn list_ids(&self) -> Result<Vec<EntityId>, StoreError>;
}
