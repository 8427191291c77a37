//! guru-refresh - AI review analysis refresh for gurus
//!
//! A CLI tool that recomputes the AI-generated review analysis of one guru
//! (or sweeps all of them) with Ollama, coalescing concurrent refreshes and
//! persisting results with compare-and-set.
//!
//! Exit codes:
//!   0 - Success (or failures during a sweep without --fail-on-error)
//!   1 - Runtime error (config, data file, or a failed single refresh)
//!   2 - At least one refresh failed and --fail-on-error was set

mod analysis;
mod cli;
mod clock;
mod config;
mod engine;
mod error;
mod models;
mod refresh;
mod report;
mod store;

use anyhow::{Context, Result};
use chrono::Utc;
use cli::{Args, OutputFormat};
use config::{Config, DEFAULT_CONFIG_FILE};
use models::RefreshOutcome;
use refresh::{RefreshCoordinator, SweepCounts, SweepEntry, SweepOptions, SweepSummary};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use store::MemoryStore;
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    // Load configuration before logging so the file can turn on verbose
    // output; where it came from is logged once the subscriber exists.
    let (mut config, config_source) = match load_config(&args) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    };
    config.merge_with_args(&args);

    // Initialize logging
    init_logging(&args, &config)?;

    info!("guru-refresh v{}", env!("CARGO_PKG_VERSION"));
    match config_source {
        ConfigSource::File(path) => info!("Loaded config from: {}", path.display()),
        ConfigSource::Defaults => debug!("No config file found, using defaults"),
        ConfigSource::Invalid(e) => warn!("Failed to load config, using defaults: {}", e),
    }
    debug!("Arguments: {:?}", args);

    match run(args, config).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Refresh failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .gururefresh.toml.
fn handle_init_config() -> Result<()> {
    let path = std::path::Path::new(DEFAULT_CONFIG_FILE);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            DEFAULT_CONFIG_FILE
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", DEFAULT_CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", DEFAULT_CONFIG_FILE);
    println!("   Edit it to customize the model, freshness window, lease TTL, and data file.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
fn init_logging(args: &Args, config: &Config) -> Result<()> {
    let level = args.log_level(config.general.verbose);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")
}

/// Run a single refresh or a sweep. Returns the exit code.
async fn run(args: Args, config: Config) -> Result<i32> {
    config.validate()?;

    let store = Arc::new(MemoryStore::open(&config.store.path).await?);

    let engine = engine::OllamaEngine::new(config.engine_config())
        .context("Failed to build the analysis engine")?;

    let coordinator = RefreshCoordinator::new(
        store.clone(),
        store.clone(),
        Arc::new(engine),
        Arc::new(clock::SystemClock),
        config.refresh_policy(),
    );

    if !args.quiet {
        let policy = coordinator.policy();
        println!("🤖 Analysis engine");
        println!("   Model: {}", coordinator.model_name());
        println!("   Ollama: {}", config.model.ollama_url);
        println!("   Timeout: {}s", policy.engine_timeout.as_secs());
        println!(
            "   Freshness window: {}s | Lease TTL: {}s",
            policy.freshness_window.num_seconds(),
            policy.lease_ttl.num_seconds()
        );
    }

    let summary = match args.entity {
        Some(ref entity_id) => refresh_one(&coordinator, entity_id, &args).await,
        None => {
            if !args.quiet {
                println!("\n🔄 Sweeping all gurus...\n");
            }
            let options = SweepOptions {
                force: args.force,
                concurrency: config.general.concurrency,
                show_progress: !args.quiet,
            };
            refresh::sweep(&coordinator, &options).await?
        }
    };

    store.close().await?;

    // Generate and save the report
    let report = report::Report::from_summary(&summary, coordinator.model_name(), args.force);
    let output = match args.format {
        OutputFormat::Json => report::generate_json_report(&report)?,
        OutputFormat::Markdown => report::generate_markdown_report(&report),
    };
    let output_path = PathBuf::from(&config.general.output);
    report::write_report(&output, &output_path)?;

    print_summary(&summary.counts, summary.duration_seconds, args.quiet);
    for (entity_id, e) in summary.failures() {
        eprintln!("   ⚠️  {}: {}", entity_id, e);
    }
    if !args.quiet {
        println!("\n✅ Report saved to: {}", output_path.display());
    }

    if summary.counts.failed > 0 {
        if args.fail_on_error {
            eprintln!(
                "\n⛔ {} refresh(es) failed. Failing (exit code 2).",
                summary.counts.failed
            );
            return Ok(2);
        }
        if args.entity.is_some() {
            return Ok(1);
        }
    }

    Ok(0)
}

/// Refresh one entity and wrap the result like a one-entry sweep.
async fn refresh_one(coordinator: &RefreshCoordinator, entity_id: &str, args: &Args) -> SweepSummary {
    let started_at = Utc::now();
    let start = Instant::now();

    if !args.quiet {
        println!("\n🔄 Refreshing guru: {}", entity_id);
    }

    let result = coordinator.refresh(entity_id, args.force, args.wait).await;
    match &result {
        Ok(outcome) => {
            info!(entity_id, outcome = outcome.kind(), "Refresh finished");
            if !args.quiet {
                print_outcome(outcome);
            }
        }
        Err(e) => warn!(entity_id, error = %e, "Refresh failed"),
    }

    let duration_seconds = start.elapsed().as_secs_f64();
    let entries = vec![SweepEntry {
        entity_id: entity_id.to_string(),
        result,
        duration_seconds,
    }];
    let counts = SweepCounts::from_entries(&entries);

    SweepSummary {
        started_at,
        duration_seconds,
        entries,
        counts,
    }
}

fn print_outcome(outcome: &RefreshOutcome) {
    println!("   {}", outcome);
    if let RefreshOutcome::Refreshed { stats, .. } = outcome {
        println!("   Stats: {}", stats);
    }
    if let Some(analysis) = outcome.analysis() {
        println!("\n{}\n", analysis.text);
    }
}

fn print_summary(counts: &SweepCounts, duration_seconds: f64, quiet: bool) {
    if quiet {
        return;
    }
    println!("\n📊 Refresh Summary:");
    println!("   Gurus: {}", counts.total);
    println!(
        "   - Refreshed: {} | Cached: {} | In progress: {} | Superseded: {} | Failed: {}",
        counts.refreshed, counts.cached, counts.in_progress, counts.superseded, counts.failed
    );
    println!("   Duration: {:.1}s", duration_seconds);
}

/// Where the configuration came from.
enum ConfigSource {
    File(PathBuf),
    Defaults,
    Invalid(anyhow::Error),
}

/// Load configuration from file or use defaults.
///
/// An explicit `--config` that fails to load is an error; a broken default
/// file falls back to defaults.
fn load_config(args: &Args) -> Result<(Config, ConfigSource)> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        let config = Config::load(config_path)?;
        return Ok((config, ConfigSource::File(config_path.clone())));
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => Ok((config, ConfigSource::File(PathBuf::from(DEFAULT_CONFIG_FILE)))),
        Ok(None) => Ok((Config::default(), ConfigSource::Defaults)),
        Err(e) => Ok((Config::default(), ConfigSource::Invalid(e))),
    }
}
