//! Data models for the refresh pipeline.
//!
//! This module contains the core data structures shared by the stores,
//! the aggregator, the analysis engine and the refresh coordinator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a tracked entity (a guru).
pub type EntityId = String;

/// Rating statistics over the visible reviews of one entity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RatingStats {
    /// Number of visible reviews.
    pub count: u64,
    /// Arithmetic mean of the visible ratings, `None` when there are none.
    pub average: Option<f64>,
}

impl RatingStats {
    /// Returns the average rounded to one decimal place, for display.
    pub fn rounded_average(&self) -> Option<f64> {
        self.average.map(|avg| (avg * 10.0).round() / 10.0)
    }
}

impl fmt::Display for RatingStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.rounded_average() {
            Some(avg) => write!(f, "{} reviews, avg {:.1}", self.count, avg),
            None => write!(f, "{} reviews, no average", self.count),
        }
    }
}

/// A persisted AI analysis of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiAnalysis {
    /// Analysis text produced by the engine.
    pub text: String,
    /// When this analysis was computed.
    pub computed_at: DateTime<Utc>,
    /// Monotonic version, starting at 1 for the first analysis.
    pub version: u64,
}

/// A tracked entity (guru) as stored in the entity record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub id: EntityId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instagram_handle: Option<String>,
    #[serde(default)]
    pub rating_stats: RatingStats,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_analysis: Option<AiAnalysis>,
}

impl Entity {
    /// Creates an entity with no stats and no analysis.
    pub fn new(id: impl Into<EntityId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            category: None,
            location: None,
            instagram_handle: None,
            rating_stats: RatingStats::default(),
            ai_analysis: None,
        }
    }

    /// Timestamp of the current analysis, if any.
    pub fn computed_at(&self) -> Option<DateTime<Utc>> {
        self.ai_analysis.as_ref().map(|a| a.computed_at)
    }

    /// Version of the current analysis, 0 when never analyzed.
    pub fn analysis_version(&self) -> u64 {
        self.ai_analysis.as_ref().map_or(0, |a| a.version)
    }

    /// The read-only metadata handed to the analysis engine.
    pub fn metadata(&self) -> EntityMetadata {
        EntityMetadata {
            id: self.id.clone(),
            name: self.name.clone(),
            category: self.category.clone(),
            location: self.location.clone(),
            instagram_handle: self.instagram_handle.clone(),
        }
    }
}

/// Descriptive entity fields used to build the analysis prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityMetadata {
    pub id: EntityId,
    pub name: String,
    pub category: Option<String>,
    pub location: Option<String>,
    pub instagram_handle: Option<String>,
}

/// A review left for an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    pub id: String,
    pub entity_id: EntityId,
    /// Star rating, expected in 1..=5.
    pub rating: u8,
    #[serde(default)]
    pub content: String,
    /// Hidden reviews are excluded from stats and analysis.
    #[serde(default)]
    pub hidden: bool,
    pub created_at: DateTime<Utc>,
}

/// What a refresh produced.
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    /// The cached analysis was fresh; nothing was recomputed.
    Cached(AiAnalysis),
    /// A new analysis was computed and persisted.
    Refreshed {
        analysis: AiAnalysis,
        stats: RatingStats,
    },
    /// Another refresh for this entity is running.
    InProgress { started_at: DateTime<Utc> },
    /// Our result lost the compare-and-set to a newer write. Carries the
    /// analysis that is stored now.
    Superseded(AiAnalysis),
}

impl RefreshOutcome {
    /// Short lowercase label used in logs and reports.
    pub fn kind(&self) -> &'static str {
        match self {
            RefreshOutcome::Cached(_) => "cached",
            RefreshOutcome::Refreshed { .. } => "refreshed",
            RefreshOutcome::InProgress { .. } => "in_progress",
            RefreshOutcome::Superseded(_) => "superseded",
        }
    }

    /// The analysis visible to the caller after this outcome, if any.
    pub fn analysis(&self) -> Option<&AiAnalysis> {
        match self {
            RefreshOutcome::Cached(a) | RefreshOutcome::Superseded(a) => Some(a),
            RefreshOutcome::Refreshed { analysis, .. } => Some(analysis),
            RefreshOutcome::InProgress { .. } => None,
        }
    }
}

impl fmt::Display for RefreshOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefreshOutcome::Cached(a) => write!(f, "Cached (v{})", a.version),
            RefreshOutcome::Refreshed { analysis, stats } => {
                write!(f, "Refreshed (v{}, {})", analysis.version, stats)
            }
            RefreshOutcome::InProgress { started_at } => {
                write!(f, "In progress since {}", started_at.format("%H:%M:%S UTC"))
            }
            RefreshOutcome::Superseded(a) => write!(f, "Superseded by v{}", a.version),
        }
    }
}
