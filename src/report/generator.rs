//! Refresh report generation.
//!
//! This module renders the outcome of a refresh run (one entity or a full
//! sweep) as Markdown or JSON.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;

use crate::models::{RatingStats, RefreshOutcome};
use crate::refresh::{SweepCounts, SweepEntry, SweepSummary};

/// Metadata about the refresh run.
#[derive(Debug, Clone, Serialize)]
pub struct ReportMetadata {
    /// When the run started.
    pub run_date: DateTime<Utc>,
    /// Name of the LLM model used.
    pub model_used: String,
    /// Whether recomputation was forced.
    pub forced: bool,
    /// Duration of the run in seconds.
    pub duration_seconds: f64,
}

/// One entity's line in the report.
#[derive(Debug, Clone, Serialize)]
pub struct ReportEntry {
    pub entity_id: String,
    /// `refreshed`, `cached`, `in_progress`, `superseded` or `failed`.
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub computed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<RatingStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_seconds: f64,
}

impl From<&SweepEntry> for ReportEntry {
    fn from(entry: &SweepEntry) -> Self {
        let (outcome, analysis, stats, error) = match &entry.result {
            Ok(outcome) => {
                let stats = match outcome {
                    RefreshOutcome::Refreshed { stats, .. } => Some(*stats),
                    _ => None,
                };
                (outcome.kind().to_string(), outcome.analysis(), stats, None)
            }
            Err(e) => ("failed".to_string(), None, None, Some(e.to_string())),
        };

        Self {
            entity_id: entry.entity_id.clone(),
            outcome,
            version: analysis.map(|a| a.version),
            computed_at: analysis.map(|a| a.computed_at),
            stats,
            error,
            duration_seconds: entry.duration_seconds,
        }
    }
}

/// The complete refresh report.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub metadata: ReportMetadata,
    pub summary: SweepCounts,
    pub entries: Vec<ReportEntry>,
}

impl Report {
    /// Builds a report from a finished run.
    pub fn from_summary(summary: &SweepSummary, model_used: &str, forced: bool) -> Self {
        Self {
            metadata: ReportMetadata {
                run_date: summary.started_at,
                model_used: model_used.to_string(),
                forced,
                duration_seconds: summary.duration_seconds,
            },
            summary: summary.counts.clone(),
            entries: summary.entries.iter().map(ReportEntry::from).collect(),
        }
    }
}

/// Generate a complete Markdown report.
pub fn generate_markdown_report(report: &Report) -> String {
    let mut output = String::new();

    output.push_str("# Guru Analysis Refresh Report\n\n");
    output.push_str(&generate_metadata_section(&report.metadata));
    output.push_str(&generate_summary_section(&report.summary));
    output.push_str(&generate_entries_section(&report.entries));
    output.push_str(&generate_failures_section(&report.entries));
    output.push_str(&generate_footer());

    output
}

/// Generate the metadata section.
fn generate_metadata_section(metadata: &ReportMetadata) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!(
        "- **Run Date:** {}\n",
        metadata.run_date.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!("- **Model Used:** `{}`\n", metadata.model_used));
    section.push_str(&format!(
        "- **Forced:** {}\n",
        if metadata.forced { "yes" } else { "no" }
    ));
    section.push_str(&format!(
        "- **Duration:** {:.1}s\n",
        metadata.duration_seconds
    ));
    section.push('\n');

    section
}

/// Generate the outcome summary table.
fn generate_summary_section(summary: &SweepCounts) -> String {
    let mut section = String::new();

    section.push_str("## Summary\n\n");
    section.push_str("| Refreshed | Cached | In Progress | Superseded | Failed | **Total** |\n");
    section.push_str("|:---:|:---:|:---:|:---:|:---:|:---:|\n");
    section.push_str(&format!(
        "| {} | {} | {} | {} | {} | **{}** |\n\n",
        summary.refreshed,
        summary.cached,
        summary.in_progress,
        summary.superseded,
        summary.failed,
        summary.total
    ));

    section
}

/// Generate the per-entity table.
fn generate_entries_section(entries: &[ReportEntry]) -> String {
    let mut section = String::new();

    section.push_str("## Entities\n\n");

    if entries.is_empty() {
        section.push_str("No entities were processed.\n\n");
        return section;
    }

    section.push_str("| Entity | Outcome | Version | Computed At | Reviews | Average |\n");
    section.push_str("|:---|:---|:---:|:---|:---:|:---:|\n");

    for entry in entries {
        let version = entry
            .version
            .map_or_else(|| "-".to_string(), |v| v.to_string());
        let computed_at = entry.computed_at.map_or_else(
            || "-".to_string(),
            |t| t.format("%Y-%m-%d %H:%M").to_string(),
        );
        let (count, average) = match &entry.stats {
            Some(stats) => (
                stats.count.to_string(),
                stats
                    .rounded_average()
                    .map_or_else(|| "-".to_string(), |a| format!("{:.1}", a)),
            ),
            None => ("-".to_string(), "-".to_string()),
        };

        section.push_str(&format!(
            "| `{}` | {} | {} | {} | {} | {} |\n",
            entry.entity_id, entry.outcome, version, computed_at, count, average
        ));
    }
    section.push('\n');

    section
}

/// Generate the failures section (empty when nothing failed).
fn generate_failures_section(entries: &[ReportEntry]) -> String {
    let failures: Vec<_> = entries
        .iter()
        .filter_map(|e| e.error.as_ref().map(|err| (&e.entity_id, err)))
        .collect();

    if failures.is_empty() {
        return String::new();
    }

    let mut section = String::new();
    section.push_str("## Failures\n\n");
    for (entity_id, error) in failures {
        section.push_str(&format!("- `{}`: {}\n", entity_id, error));
    }
    section.push('\n');

    section
}

/// Generate the report footer.
fn generate_footer() -> String {
    let mut footer = String::new();

    footer.push_str("---\n\n");
    footer.push_str("*Report generated by guru-refresh*\n");

    footer
}

/// Generate a JSON report.
pub fn generate_json_report(report: &Report) -> Result<String> {
    serde_json::to_string_pretty(report).map_err(Into::into)
}

/// Write rendered report content to a file.
pub fn write_report(content: &str, path: &Path) -> Result<()> {
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write report to {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RefreshError;
    use crate::models::AiAnalysis;
    use chrono::TimeZone;

    fn create_test_summary() -> SweepSummary {
        let at = Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap();
        let analysis = AiAnalysis {
            text: "Great".to_string(),
            computed_at: at,
            version: 3,
        };
        let entries = vec![
            SweepEntry {
                entity_id: "ada".to_string(),
                result: Ok(RefreshOutcome::Refreshed {
                    analysis: analysis.clone(),
                    stats: RatingStats {
                        count: 3,
                        average: Some(4.0),
                    },
                }),
                duration_seconds: 1.5,
            },
            SweepEntry {
                entity_id: "ben".to_string(),
                result: Ok(RefreshOutcome::Cached(analysis)),
                duration_seconds: 0.01,
            },
            SweepEntry {
                entity_id: "cy".to_string(),
                result: Err(RefreshError::AnalysisFailed {
                    entity_id: "cy".to_string(),
                    cause: "analysis timed out after 90s".to_string(),
                }),
                duration_seconds: 90.0,
            },
        ];
        let counts = SweepCounts::from_entries(&entries);

        SweepSummary {
            started_at: at,
            duration_seconds: 91.5,
            entries,
            counts,
        }
    }

    #[test]
    fn test_generate_markdown_report() {
        let report = Report::from_summary(&create_test_summary(), "llama3.2:latest", false);
        let markdown = generate_markdown_report(&report);

        assert!(markdown.contains("# Guru Analysis Refresh Report"));
        assert!(markdown.contains("## Metadata"));
        assert!(markdown.contains("## Summary"));
        assert!(markdown.contains("| 1 | 1 | 0 | 0 | 1 | **3** |"));
        assert!(markdown.contains("| `ada` | refreshed | 3 | 2026-01-15 12:00 | 3 | 4.0 |"));
        assert!(markdown.contains("| `ben` | cached | 3 |"));
        assert!(markdown.contains("## Failures"));
        assert!(markdown.contains("timed out"));
    }

    #[test]
    fn test_markdown_report_without_failures() {
        let mut summary = create_test_summary();
        summary.entries.truncate(2);
        summary.counts = SweepCounts::from_entries(&summary.entries);

        let markdown = generate_markdown_report(&Report::from_summary(&summary, "m", true));
        assert!(!markdown.contains("## Failures"));
        assert!(markdown.contains("- **Forced:** yes"));
    }

    #[test]
    fn test_generate_json_report() {
        let report = Report::from_summary(&create_test_summary(), "m", false);
        let json = generate_json_report(&report).unwrap();

        assert!(json.contains("\"model_used\""));
        assert!(json.contains("\"entries\""));
        assert!(json.contains("\"failed\": 1"));

        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["entries"][2]["outcome"], "failed");
        assert!(value["entries"][1].get("stats").is_none());
    }

    #[test]
    fn test_write_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.md");
        write_report("# hi\n", &path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "# hi\n");
    }
}
