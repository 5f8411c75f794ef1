//! College Harvest main entry point
//!
//! This is the command-line interface for the college website harvester.

use anyhow::Context;
use clap::Parser;
use college_harvest::config::load_or_default;
use college_harvest::crawler::{Orchestrator, RunMode};
use college_harvest::output::{print_summary, print_targets};
use college_harvest::storage::{open_storage, Storage};
use college_harvest::TargetRegistry;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// College Harvest: crawl, extract and fuse college admission and placement data
///
/// Crawls the configured college websites politely, extracts admission,
/// placement and internship facts from HTML, tables, PDFs and images, and
/// stores raw documents plus versioned structured records in SQLite.
#[derive(Parser, Debug)]
#[command(name = "college-harvest")]
#[command(version)]
#[command(about = "Crawl-extract-fuse pipeline for college websites", long_about = None)]
struct Cli {
    /// Path to TOML configuration file (built-in defaults when omitted)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Only work on the target with this name or alias
    #[arg(short, long, value_name = "NAME")]
    target: Option<String>,

    /// List configured targets with their stored document counts and exit
    #[arg(long, conflicts_with_all = ["process_only", "reprocess"])]
    list: bool,

    /// Re-run extraction and fusion over stored raw documents without fetching
    #[arg(long)]
    process_only: bool,

    /// Mark the selected targets' documents stale so all of them are re-processed
    #[arg(long, requires = "process_only")]
    reprocess: bool,

    /// Force lightweight HTTP fetching instead of the headless browser
    #[arg(long)]
    no_browser: bool,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    let (config, config_hash) = load_or_default(cli.config.as_deref())
        .context("failed to load configuration")?;
    match &cli.config {
        Some(path) => tracing::info!(
            "Configuration loaded from {} (hash: {})",
            path.display(),
            config_hash
        ),
        None => tracing::info!("No configuration file given, using built-in defaults"),
    }

    let registry = TargetRegistry::from_config(&config).context("invalid target registry")?;

    if cli.list {
        return handle_list(&registry, Path::new(&config.storage.database_path));
    }

    let targets = registry.select(cli.target.as_deref())?;
    let mode = if cli.process_only {
        RunMode::ProcessOnly
    } else {
        RunMode::Crawl
    };
    tracing::info!(
        "Starting {} over {} target(s)",
        mode,
        targets.len()
    );

    let orchestrator = Orchestrator::new(config, config_hash, targets, cli.no_browser)
        .context("failed to initialize pipeline")?;

    let token = orchestrator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing in-flight work");
            token.cancel();
        }
    });

    let summary = orchestrator
        .run(mode, cli.reprocess)
        .await
        .context("run aborted")?;

    if !cli.quiet {
        print_summary(&summary);
    }
    if !summary.is_clean() {
        tracing::warn!("Some documents or fetches failed; see the summary above");
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("college_harvest=info,warn"),
            1 => EnvFilter::new("college_harvest=debug,info"),
            2 => EnvFilter::new("college_harvest=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles --list: prints targets and what is stored for them
fn handle_list(registry: &TargetRegistry, database: &Path) -> anyhow::Result<()> {
    let storage = open_storage(database)
        .with_context(|| format!("failed to open database {}", database.display()))?;
    let counts = storage.target_counts()?;

    print_targets(registry.all(), &counts);
    Ok(())
}
