use anyhow::{Context, Result};
use clap::{Arg, Command};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use jav_meta_updater::catalog::{CatalogScraper, CoverCache, HttpTransport, ReqwestTransport};
use jav_meta_updater::config::{Config, LoggingConfig};
use jav_meta_updater::library::{MediaLibrary, PlexLibrary};
use jav_meta_updater::processing::{BatchProcessor, ItemFilter, ProcessingMode};
use jav_meta_updater::reconcile::{ItemOutcome, Reconciler};

fn init_logging(logging: &LoggingConfig, verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { logging.level.as_str() };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("jav_meta_updater={},warn", level)));

    let file_layer = match logging.log_file.as_ref().filter(|p| !p.as_os_str().is_empty()) {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Cannot open log file {}", path.display()))?;
            Some(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();
    Ok(())
}

/// Load the configuration under a console-only subscriber
fn load_config(path: Option<&std::path::Path>, verbose: bool) -> Result<Config> {
    let level = if verbose { "debug" } else { "info" };
    let bootstrap = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("jav_meta_updater={},warn", level))),
        )
        .finish();
    tracing::subscriber::with_default(bootstrap, || Config::load(path))
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("JAV Meta Updater")
        .version("0.1.0")
        .author("TigreRoll")
        .about("Fill Plex library metadata from the JavLibrary catalog")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file (TOML)")
        )
        .arg(
            Arg::new("limit")
                .long("limit")
                .value_name("NUM")
                .help("Only process the first NUM library items")
                .value_parser(clap::value_parser!(usize))
        )
        .arg(
            Arg::new("code")
                .long("code")
                .value_name("CODE")
                .help("Only process items whose filename contains CODE")
        )
        .arg(
            Arg::new("dry-run")
                .long("dry-run")
                .help("Fetch and parse metadata without writing to the library")
                .action(clap::ArgAction::SetTrue)
        )
        .arg(
            Arg::new("threads")
                .short('w')
                .long("threads")
                .value_name("NUM")
                .help("Number of parallel workers")
                .value_parser(clap::value_parser!(usize))
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging")
                .action(clap::ArgAction::SetTrue)
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config").map(PathBuf::from);
    let dry_run = matches.get_flag("dry-run");
    let verbose = matches.get_flag("verbose");

    // Load configuration
    let mut config = load_config(config_path.as_deref(), verbose)?;
    if let Some(workers) = matches.get_one::<usize>("threads") {
        config.processing.workers = *workers;
    }
    config.validate(dry_run)?;

    init_logging(&config.logging, verbose)?;
    if verbose {
        info!("Verbose logging enabled");
    }

    info!("🚀 JAV Meta Updater starting...");
    debug!("{}", config.summary());

    let transport: Arc<dyn HttpTransport> = Arc::new(ReqwestTransport::new(
        config.catalog.timeout_seconds,
        config.catalog.proxy.as_deref(),
        config.catalog.user_agent.as_deref(),
    )?);
    let scraper = CatalogScraper::new(Arc::clone(&transport), &config.catalog)
        .with_debug_dir(config.processing.debug_dir.clone());

    let library: Arc<dyn MediaLibrary> = Arc::new(
        PlexLibrary::connect(
            &config.library.url,
            &config.library.token,
            &config.library.section,
            config.library.timeout_seconds,
        )
        .await
        .context("Cannot connect to the Plex library")?,
    );

    let reconciler = Reconciler::new(
        Arc::clone(&library),
        Arc::new(scraper),
        config.rules.clone(),
        config.genre_mapping.clone(),
    )
    .with_cover_cache(CoverCache::new(config.processing.cover_cache_dir.clone(), transport));

    let mode = if dry_run { ProcessingMode::DryRun } else { ProcessingMode::Update };
    let processor = BatchProcessor::new(
        reconciler,
        config.processing.workers,
        Duration::from_secs_f64(config.processing.item_delay_seconds),
        mode,
    );

    let filter = ItemFilter {
        limit: matches.get_one::<usize>("limit").copied(),
        code: matches.get_one::<String>("code").cloned(),
    };

    let summary = processor.process_library(library.as_ref(), &filter).await?;

    // Print results
    info!("{}", "=".repeat(50));
    info!("🎉 Processing completed in {:.2}s", summary.total_time.as_secs_f64());
    info!("✅ Successful: {}", summary.successful);
    info!("❌ Failed: {}", summary.failed);
    for outcome in [
        ItemOutcome::Updated,
        ItemOutcome::CollectionsOnly,
        ItemOutcome::Skipped,
        ItemOutcome::DryRun,
        ItemOutcome::NotFound,
        ItemOutcome::Unresolved,
        ItemOutcome::Failed,
    ] {
        let count = summary.count(outcome);
        if count > 0 {
            info!("   {}: {}", outcome, count);
        }
    }
    if summary.failed > 0 {
        warn!("{} items need attention, see the log above", summary.failed);
    }

    Ok(())
}
