//! Analysis engine collaborators.
//!
//! The coordinator depends only on [`AnalysisEngine`]; `OllamaEngine` is the
//! production backend talking to an Ollama chat endpoint.

pub mod ollama;
pub mod prompt;

pub use ollama::{EngineConfig, OllamaEngine};

use async_trait::async_trait;
use std::time::Duration;

use crate::error::EngineError;
use crate::models::{EntityMetadata, RatingStats, Review};

/// Produces an analysis text from an entity's reviews and stats.
#[async_trait]
pub trait AnalysisEngine: Send + Sync {
    /// Runs one analysis. `timeout` bounds the backend call; the coordinator
    /// enforces the same bound independently.
    async fn analyze(
        &self,
        entity: &EntityMetadata,
        reviews: &[Review],
        stats: &RatingStats,
        timeout: Duration,
    ) -> Result<String, EngineError>;

    /// Model identifier, for logs and reports.
    fn model_name(&self) -> &str;
}
