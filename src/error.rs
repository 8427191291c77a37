//! Error types for the refresh pipeline.
//!
//! Store and engine failures are typed so the coordinator can map them onto
//! the caller-facing taxonomy. `RefreshError` is `Clone` because a single
//! outcome is broadcast to every caller waiting on the same refresh.

use std::time::Duration;
use thiserror::Error;

use crate::models::EntityId;

/// Failures raised by the review and entity stores.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("entity not found: {0}")]
    EntityNotFound(EntityId),
}

/// Failures raised by the analysis engine.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("analysis timed out after {0:?}")]
    Timeout(Duration),

    #[error("cannot reach analysis backend at {0}")]
    Unreachable(String),

    #[error("analysis backend returned {status}: {body}")]
    Backend { status: u16, body: String },

    #[error("analysis backend returned an empty analysis")]
    EmptyResponse,

    #[error("analysis request failed: {0}")]
    Request(String),
}

/// Caller-facing refresh failures.
#[derive(Debug, Clone, Error)]
pub enum RefreshError {
    #[error("entity not found: {0}")]
    NotFound(EntityId),

    #[error("store unavailable while refreshing {entity_id}: {cause}")]
    StoreUnavailable { entity_id: EntityId, cause: String },

    #[error("analysis failed for {entity_id}: {cause}")]
    AnalysisFailed { entity_id: EntityId, cause: String },
}

impl RefreshError {
    /// Wraps a store failure with the entity it happened for.
    pub fn from_store(entity_id: &str, err: StoreError) -> Self {
        match err {
            StoreError::EntityNotFound(id) => RefreshError::NotFound(id),
            StoreError::Unavailable(cause) => RefreshError::StoreUnavailable {
                entity_id: entity_id.to_string(),
                cause,
            },
        }
    }

    /// Wraps an engine failure with the entity it happened for.
    pub fn from_engine(entity_id: &str, err: EngineError) -> Self {
        RefreshError::AnalysisFailed {
            entity_id: entity_id.to_string(),
            cause: err.to_string(),
        }
    }

    /// Whether re-running the whole refresh may succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, RefreshError::NotFound(_))
    }
}
