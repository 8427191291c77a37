//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use clap::Parser;
use std::path::PathBuf;

/// guru-refresh - refresh AI review analyses for gurus
///
/// Recomputes a guru's AI analysis when it is stale (or when forced),
/// making sure the model runs at most once per guru at a time.
///
/// Examples:
///   guru-refresh --entity ada-lovelace
///   guru-refresh --entity ada-lovelace --force --wait
///   guru-refresh --all --concurrency 8 --format json --output sweep.json
///   guru-refresh --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Guru id to refresh
    #[arg(
        short,
        long,
        value_name = "ID",
        required_unless_present_any = ["all", "init_config"],
        conflicts_with = "all"
    )]
    pub entity: Option<String>,

    /// Refresh every guru (scheduled sweep)
    #[arg(long)]
    pub all: bool,

    /// Recompute even if the cached analysis is fresh
    #[arg(short, long)]
    pub force: bool,

    /// Wait for an already running refresh instead of reporting it in progress
    #[arg(short, long)]
    pub wait: bool,

    /// JSON data file holding gurus and reviews
    #[arg(short, long, value_name = "FILE", env = "GURU_REFRESH_DATA")]
    pub data: Option<PathBuf>,

    /// Path to configuration file
    ///
    /// If not specified, looks for .gururefresh.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Ollama model to use for analysis
    #[arg(short, long, env = "GURU_REFRESH_MODEL")]
    pub model: Option<String>,

    /// Ollama API endpoint URL
    #[arg(long, env = "OLLAMA_URL")]
    pub ollama_url: Option<String>,

    /// Timeout for one analysis call, in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Age in seconds under which a cached analysis is served as is
    #[arg(long, value_name = "SECS")]
    pub freshness_window: Option<u64>,

    /// Number of concurrent refreshes during --all
    #[arg(long, value_name = "NUM")]
    pub concurrency: Option<usize>,

    /// Output format (markdown, json)
    #[arg(long, default_value = "markdown", value_name = "FORMAT")]
    pub format: OutputFormat,

    /// Write a report of the run to this file
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Exit with code 2 if any refresh failed
    #[arg(long)]
    pub fail_on_error: bool,

    /// Generate a default .gururefresh.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Output format for the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Skip validation for --init-config
        if self.init_config {
            return Ok(());
        }

        if let Some(ref entity) = self.entity {
            if entity.trim().is_empty() {
                return Err("Entity id cannot be empty".to_string());
            }
        }

        if let Some(ref url) = self.ollama_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err("Ollama URL must start with 'http://' or 'https://'".to_string());
            }
        }

        if self.concurrency == Some(0) {
            return Err("Concurrency must be at least 1".to_string());
        }

        if self.timeout == Some(0) {
            return Err("Timeout must be at least 1 second".to_string());
        }

        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if self.wait && self.all {
            return Err("--wait applies to a single --entity refresh".to_string());
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings. `config_verbose`
    /// is `general.verbose` from the config file; `--quiet` wins over both.
    pub fn log_level(&self, config_verbose: bool) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose || config_verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}
