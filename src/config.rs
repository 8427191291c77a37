//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.gururefresh.toml` files.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::engine::EngineConfig;
use crate::refresh::RefreshPolicy;

/// Default config file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = ".gururefresh.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Model settings.
    #[serde(default)]
    pub model: ModelConfig,

    /// Refresh coordination settings.
    #[serde(default)]
    pub refresh: RefreshConfig,

    /// Data store settings.
    #[serde(default)]
    pub store: StoreConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Default output file path for reports.
    #[serde(default = "default_output")]
    pub output: String,

    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,

    /// Number of concurrent refreshes during a sweep.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            output: default_output(),
            verbose: false,
            concurrency: default_concurrency(),
        }
    }
}

fn default_output() -> String {
    "guru_refresh_report.md".to_string()
}

fn default_concurrency() -> usize {
    4
}

/// LLM model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Default model name.
    #[serde(default = "default_model")]
    pub name: String,

    /// Ollama API URL.
    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,

    /// Temperature for generation.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Timeout for one analysis call, in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Most recent reviews included in the prompt.
    #[serde(default = "default_max_reviews")]
    pub max_reviews_in_prompt: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: default_model(),
            ollama_url: default_ollama_url(),
            temperature: default_temperature(),
            timeout_seconds: default_timeout(),
            max_reviews_in_prompt: default_max_reviews(),
        }
    }
}

fn default_model() -> String {
    "llama3.2:latest".to_string()
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_temperature() -> f32 {
    0.3
}

fn default_timeout() -> u64 {
    90
}

fn default_max_reviews() -> usize {
    50
}

/// Staleness and lease settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshConfig {
    /// A cached analysis younger than this is served without recomputing.
    #[serde(default = "default_freshness_window")]
    pub freshness_window_seconds: u64,

    /// Age after which an in-flight refresh is considered abandoned.
    #[serde(default = "default_lease_ttl")]
    pub lease_ttl_seconds: u64,

    /// Compare-and-set attempts before a write is given up.
    #[serde(default = "default_cas_attempts")]
    pub max_cas_attempts: usize,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            freshness_window_seconds: default_freshness_window(),
            lease_ttl_seconds: default_lease_ttl(),
            max_cas_attempts: default_cas_attempts(),
        }
    }
}

fn default_freshness_window() -> u64 {
    3600
}

fn default_lease_ttl() -> u64 {
    120
}

fn default_cas_attempts() -> usize {
    3
}

/// Data store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// JSON snapshot holding gurus and reviews.
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

fn default_store_path() -> PathBuf {
    PathBuf::from("gurus.json")
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(DEFAULT_CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings, but only
    /// when they were actually given.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref model) = args.model {
            self.model.name = model.clone();
        }
        if let Some(ref url) = args.ollama_url {
            self.model.ollama_url = url.clone();
        }
        if let Some(timeout) = args.timeout {
            self.model.timeout_seconds = timeout;
        }
        if let Some(window) = args.freshness_window {
            self.refresh.freshness_window_seconds = window;
        }
        if let Some(ref data) = args.data {
            self.store.path = data.clone();
        }
        if let Some(concurrency) = args.concurrency {
            self.general.concurrency = concurrency;
        }
        if let Some(ref output) = args.output {
            self.general.output = output.display().to_string();
        }

        // Flags always override
        if args.verbose {
            self.general.verbose = true;
        }
    }

    /// Engine settings derived from the model section.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            ollama_url: self.model.ollama_url.clone(),
            model_name: self.model.name.clone(),
            temperature: self.model.temperature,
            max_reviews_in_prompt: self.model.max_reviews_in_prompt,
        }
    }

    /// Coordinator policy derived from the model and refresh sections.
    pub fn refresh_policy(&self) -> RefreshPolicy {
        RefreshPolicy {
            freshness_window: chrono::Duration::seconds(
                i64::try_from(self.refresh.freshness_window_seconds).unwrap_or(i64::MAX / 1000),
            ),
            lease_ttl: chrono::Duration::seconds(
                i64::try_from(self.refresh.lease_ttl_seconds).unwrap_or(i64::MAX / 1000),
            ),
            engine_timeout: std::time::Duration::from_secs(self.model.timeout_seconds),
            max_cas_attempts: self.refresh.max_cas_attempts.max(1),
        }
    }

    /// Check values that would make the coordinator misbehave.
    pub fn validate(&self) -> Result<()> {
        if self.model.timeout_seconds == 0 {
            anyhow::bail!("model.timeout_seconds must be at least 1");
        }
        if self.refresh.lease_ttl_seconds <= self.model.timeout_seconds {
            anyhow::bail!(
                "refresh.lease_ttl_seconds ({}) must exceed model.timeout_seconds ({}), \
                 otherwise a healthy refresh can be taken over",
                self.refresh.lease_ttl_seconds,
                self.model.timeout_seconds
            );
        }
        if self.general.concurrency == 0 {
            anyhow::bail!("general.concurrency must be at least 1");
        }
        Ok(())
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
