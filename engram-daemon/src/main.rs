//! `engramd` - integrated activity collection and recording daemon.
//!
//! Wraps the collector with the hot tier recorder for long-running data
//! collection while keeping the separation of concerns: the collector only
//! collects, the recorder only processes and stores, and this binary only
//! supervises. A one-shot `--ingest` mode records a JSONL capture through
//! the same hot tier path and exits.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use engram_config::{EngramPaths, Settings};
use engram_core::database::Database;
use engram_core::database::ports::HotTierStore;
use engram_core::database::postgres::{PostgresHotStore, PostgresServiceRegistry};
use engram_core::registry::ServiceRegistry;
use engram_core::runner::IntegratedRunner;
use engram_core::score::ImportanceScorer;
use engram_core::tier::HotTierRecorder;

/// Command line arguments for the Engram activity daemon.
#[derive(Parser, Debug)]
#[command(name = "engramd")]
#[command(about = "Integrated filesystem activity collection and tiered recording")]
struct Args {
    /// Volumes to monitor (drive letters on Windows, directories elsewhere)
    #[arg(long, value_delimiter = ',')]
    volumes: Vec<String>,

    /// Seconds between collection cycles
    #[arg(long)]
    interval: Option<u64>,

    /// Duration to run in hours (0 for unlimited)
    #[arg(long)]
    duration: Option<f64>,

    /// Number of days to keep data in the hot tier
    #[arg(long = "ttl-days")]
    ttl_days: Option<i64>,

    /// Disable JSONL backup files (database only)
    #[arg(long = "no-file-backup")]
    no_file_backup: bool,

    /// Directory for backup files (if enabled)
    #[arg(long = "output-dir")]
    output_dir: Option<PathBuf>,

    /// Maximum backup file size in MB before rotation
    #[arg(long = "max-file-size")]
    max_file_size: Option<u64>,

    /// Persist journal cursors to disk between runs
    #[arg(long = "use-state-file")]
    use_state_file: bool,

    /// Disable automatic state reset on persistent failures
    #[arg(long = "no-auto-reset")]
    no_auto_reset: bool,

    /// Consecutive errors before an automatic state reset
    #[arg(long = "error-threshold")]
    error_threshold: Option<u32>,

    /// Consecutive empty cycles before an automatic state reset
    #[arg(long = "empty-threshold")]
    empty_threshold: Option<u32>,

    /// Database connection URL
    #[arg(long = "db-url", env = "ENGRAM_DATABASE_URL")]
    db_url: Option<String>,

    /// Record a JSONL activity file through the hot tier and exit
    #[arg(long)]
    ingest: Option<PathBuf>,

    /// Print hot tier statistics after a one-shot ingest
    #[arg(long)]
    statistics: bool,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

fn init_tracing(debug: bool) {
    let default_filter = if debug { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn apply_overrides(settings: &mut Settings, args: &Args) {
    if !args.volumes.is_empty() {
        settings.runner.volumes = args.volumes.clone();
    }
    if let Some(interval) = args.interval {
        settings.runner.interval_secs = interval;
    }
    if let Some(duration) = args.duration {
        settings.runner.duration_hours = duration;
    }
    if let Some(ttl_days) = args.ttl_days {
        settings.runner.ttl_days = ttl_days;
    }
    if args.no_file_backup {
        settings.backup.enabled = false;
    }
    if let Some(dir) = &args.output_dir {
        settings.backup.output_dir = Some(dir.clone());
    }
    if let Some(size) = args.max_file_size {
        settings.backup.max_file_size_mb = size;
    }
    if args.use_state_file {
        settings.runner.use_state_file = true;
    }
    if args.no_auto_reset {
        settings.runner.auto_reset = false;
    }
    if let Some(threshold) = args.error_threshold {
        settings.runner.error_threshold = threshold;
    }
    if let Some(threshold) = args.empty_threshold {
        settings.runner.empty_results_threshold = threshold;
    }
    if let Some(url) = &args.db_url {
        settings.database.url = Some(url.clone());
    }
}

fn banner(settings: &Settings) {
    tracing::info!("============================================================");
    tracing::info!("     Engram integrated activity collection and recording");
    tracing::info!("============================================================");
    tracing::info!("Volumes:          {}", settings.runner.volumes.join(", "));
    tracing::info!("Duration:         {} hours", settings.runner.duration_hours);
    tracing::info!("Interval:         {} seconds", settings.runner.interval_secs);
    tracing::info!("Hot tier TTL:     {} days", settings.runner.ttl_days);
    tracing::info!(
        "File backup:      {}",
        if settings.backup.enabled { "enabled" } else { "disabled" }
    );
    if settings.backup.enabled {
        if let Some(dir) = &settings.backup.output_dir {
            tracing::info!("Output directory: {}", dir.display());
        }
        tracing::info!("Max file size:    {} MB", settings.backup.max_file_size_mb);
    }
    tracing::info!(
        "Database:         {}",
        if settings.database.url.is_some() { "configured" } else { "not configured" }
    );
    tracing::info!(
        "Auto reset:       {}",
        if settings.runner.auto_reset { "enabled" } else { "disabled" }
    );
    if settings.runner.auto_reset {
        tracing::info!(
            "  Error threshold: {} consecutive errors",
            settings.runner.error_threshold
        );
        tracing::info!(
            "  Empty threshold: {} consecutive empty cycles",
            settings.runner.empty_results_threshold
        );
    }
    tracing::info!(
        "State file:       {}",
        if settings.runner.use_state_file { "enabled" } else { "disabled" }
    );
    tracing::info!("Press Ctrl+C to stop at any time");
}

async fn install_signal_handlers(token: tokio_util::sync::CancellationToken) {
    #[cfg(unix)]
    {
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    tracing::info!("shutdown signal received");
    token.cancel();
}

/// One-shot JSONL ingest against the hot tier, mirroring the long-running
/// path: register, bind to the assigned collection, bulk insert.
async fn ingest(settings: &Settings, input: &PathBuf, statistics: bool) -> anyhow::Result<()> {
    let database = Database::connect(&settings.database)
        .await
        .context("database initialization failed")?;
    let timeouts = database.timeouts();

    let registry = PostgresServiceRegistry::new(database.pool().clone(), timeouts);
    registry.ensure_schema().await?;
    let registered = registry
        .register(&engram_core::registry::ServiceRegistration::hot_tier_recorder())
        .await?;

    let store = PostgresHotStore::new(
        database.pool().clone(),
        registered.collection_name.clone(),
        timeouts,
    )?;
    store.ensure_schema().await?;

    let recorder = HotTierRecorder::new(
        Arc::new(store) as Arc<dyn HotTierStore>,
        registered.collection_name,
        ImportanceScorer::new(),
        settings.runner.ttl_days,
    );

    let started = std::time::Instant::now();
    let ids = recorder.process_jsonl_file(input).await?;
    println!(
        "Processed {} activities from {} in {:.2}s",
        ids.len(),
        input.display(),
        started.elapsed().as_secs_f64()
    );

    if statistics {
        let stats = recorder.get_statistics().await?;
        println!("\nHot tier statistics:");
        println!("  Total activities: {}", stats.tier.total_count);
        if !stats.tier.by_type.is_empty() {
            println!("  Activity types:");
            for (activity_type, count) in &stats.tier.by_type {
                println!("    - {activity_type}: {count}");
            }
        }
        if !stats.tier.by_importance.is_empty() {
            println!("  Importance distribution:");
            for (bucket, count) in &stats.tier.by_importance {
                println!("    - {bucket}: {count}");
            }
        }
    }
    Ok(())
}

async fn run(args: Args) -> anyhow::Result<()> {
    let paths = EngramPaths::from_env();
    let mut settings = Settings::load(&paths).context("failed to load configuration")?;
    apply_overrides(&mut settings, &args);

    if let Some(input) = &args.ingest {
        return ingest(&settings, input, args.statistics).await;
    }

    banner(&settings);

    let runner = IntegratedRunner::initialize(&settings, &paths)
        .await
        .context("runner initialization failed")?;

    let token = runner.shutdown_token();
    tokio::spawn(install_signal_handlers(token));

    runner.run().await.context("runner failed")?;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let args = Args::parse();
    init_tracing(args.debug);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "engramd failed");
            for cause in err.chain().skip(1) {
                tracing::error!("  caused by: {cause}");
            }
            ExitCode::FAILURE
        }
    }
}
