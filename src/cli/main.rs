use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::Ordering;

use tagsmith::config::Config;
use tagsmith::describe::DescriptionClient;
use tagsmith::metadata::ExifToolCli;
use tagsmith::orchestrator::Orchestrator;
use tagsmith::tracking::TrackingStore;

#[derive(Parser, Debug)]
#[command(
    name = "tagsmith",
    version,
    about = "AI-powered batch image describer — write AI descriptions and tags into image metadata with verify-and-restore safety and dedup tracking"
)]
struct Cli {
    /// Image files or directories to process
    #[arg(value_name = "PATH")]
    paths: Vec<PathBuf>,

    /// Path to config file (default: config.json next to binary)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Initialize a default config.json and exit
    #[arg(long)]
    init: bool,

    /// Descend into subdirectories
    #[arg(short, long)]
    recursive: bool,

    /// Reprocess files even when tracked or already described
    #[arg(long = "override")]
    override_existing: bool,

    /// Pause after every N files (0 disables batching)
    #[arg(long, value_name = "N")]
    batch_size: Option<usize>,

    /// Inter-batch pause in seconds
    #[arg(long, value_name = "SECS")]
    batch_delay: Option<u64>,

    /// Disable the tracking store for this run
    #[arg(long)]
    no_tracking: bool,

    /// Drop tracking entries whose files no longer exist, then exit
    #[arg(long)]
    cleanup_db: bool,

    /// Import a legacy path:checksum log into the store, then exit
    #[arg(long, value_name = "FILE")]
    import_log: Option<PathBuf>,

    /// Preview changes without writing to files or the store
    #[arg(long)]
    dry_run: bool,

    /// Output the run summary as JSON
    #[arg(long)]
    json: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Handle --init
    if cli.init {
        let config = Config::default();
        let path = cli.config.as_deref();
        config.save(path)?;
        let save_path = match path {
            Some(p) => p.to_path_buf(),
            None => Config::config_path()?,
        };
        println!("Default config written to {}", save_path.display());
        return Ok(());
    }

    // Load config and apply CLI overrides
    let mut config = Config::load(cli.config.as_deref())?;
    if cli.recursive {
        config.run.recursive = true;
    }
    if cli.override_existing {
        config.run.override_existing = true;
    }
    if let Some(batch_size) = cli.batch_size {
        config.run.batch_size = batch_size;
    }
    if let Some(batch_delay) = cli.batch_delay {
        config.run.batch_delay_secs = batch_delay;
    }
    if cli.no_tracking {
        config.tracking.enabled = false;
    }
    if cli.dry_run {
        config.run.dry_run = true;
    }

    // Open the tracking store
    let store = if config.tracking.enabled {
        match TrackingStore::open(&config.db_path()) {
            Ok(store) => Some(store),
            Err(e) => {
                // Store failures never block a run.
                log::warn!("Tracking store unavailable, continuing without: {e}");
                None
            }
        }
    } else {
        None
    };

    // Handle --cleanup-db
    if cli.cleanup_db {
        let Some(store) = &store else {
            anyhow::bail!("Tracking is disabled — nothing to clean up.");
        };
        let removed = store.cleanup()?;
        let stats = store.stats()?;
        println!(
            "Removed {removed} stale entries; {} remain ({} completed, {} failed)",
            stats.total, stats.completed, stats.failed
        );
        return Ok(());
    }

    // Handle --import-log
    if let Some(log_path) = &cli.import_log {
        let Some(store) = &store else {
            anyhow::bail!("Tracking is disabled — cannot import.");
        };
        let imported = store.import_legacy_log(log_path)?;
        println!("Imported {imported} entries from {}", log_path.display());
        return Ok(());
    }

    if cli.paths.is_empty() {
        anyhow::bail!("No input files or directories specified. Use --help for usage.");
    }

    let client = DescriptionClient::from_config(&config.service);
    let mut orchestrator =
        Orchestrator::new(config, store, Box::new(ExifToolCli::new()), client);

    // Cooperative cancellation: Ctrl-C finishes the current file, then
    // stops.
    let cancel = orchestrator.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupt received — stopping after the current file");
            cancel.store(true, Ordering::SeqCst);
        }
    });

    let stats = orchestrator.run(&cli.paths).await?;

    if cli.json {
        let failures: Vec<serde_json::Value> = stats
            .failures
            .iter()
            .map(|(path, detail)| {
                serde_json::json!({
                    "path": path.display().to_string(),
                    "error": detail,
                })
            })
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "success": stats.success,
                "skipped": stats.skipped,
                "tracked_skip": stats.tracked_skip,
                "error": stats.error,
                "any_success": stats.any_success(),
                "failures": failures,
            }))?
        );
    } else {
        log::info!("Run complete: {}", stats.summary());
        for (path, detail) in &stats.failures {
            log::info!("  failed: {}: {detail}", path.display());
        }
    }

    if stats.total() > 0 && !stats.any_success() && stats.error > 0 {
        std::process::exit(1);
    }

    Ok(())
}
