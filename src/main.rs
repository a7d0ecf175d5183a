use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use chrono::Utc;
use clap::Parser;
use nuget_cleaner::{
    config::CleanerConfig,
    jobs::{run_package_cleanup, start_package_cleanup_worker},
    observability,
    registry::NuGetRegistryFactory,
    snapshot::{ConfigSnapshot, SnapshotProvider},
};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// CLI arguments for the package cleaner
#[derive(Parser, Debug)]
#[command(version, about = "NuGet package cleaner", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to config file
    #[arg(short, long, global = true, default_value = "nuget-cleaner.toml")]
    config: PathBuf,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Run the cleanup worker on its configured schedule (default)
    Run,
    /// Perform a single cleanup pass and exit
    ///
    /// Exits with status 1 if the pass fails or is interrupted.
    Once,
    /// Load and resolve the configuration, print the result and exit
    ///
    /// Exits with status 1 if any package group cannot be resolved.
    Check,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let config = load_config(&args.config);

    match args.command.unwrap_or(Command::Run) {
        Command::Check => run_check(&config),
        Command::Once => run_once(config).await,
        Command::Run => run_worker(config, args.config).await,
    }
}

fn load_config(path: &Path) -> CleanerConfig {
    match CleanerConfig::from_file(path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", path.display(), e);
            std::process::exit(1);
        }
    }
}

fn run_check(config: &CleanerConfig) {
    let snapshot = ConfigSnapshot::resolve(config);
    print!("{}", snapshot.summary());

    if snapshot.issues.is_empty() {
        return;
    }
    println!("issues:");
    for issue in &snapshot.issues {
        println!("  {issue}");
    }
    std::process::exit(1);
}

fn init_observability(config: &CleanerConfig) {
    if let Err(e) = observability::init_tracing(&config.observability) {
        eprintln!("Failed to initialize tracing: {e}");
        std::process::exit(1);
    }

    if let Err(e) = observability::metrics::init_metrics(&config.observability.metrics) {
        tracing::warn!(error = %e, "Failed to initialize metrics: {e}");
    }
}

fn registry_factory(config: &CleanerConfig) -> NuGetRegistryFactory {
    match NuGetRegistryFactory::new(&config.registry) {
        Ok(factory) => factory,
        Err(e) => {
            eprintln!("Failed to build registry client: {e}");
            std::process::exit(1);
        }
    }
}

async fn run_once(config: CleanerConfig) {
    init_observability(&config);
    let factory = registry_factory(&config);

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_shutdown(cancel.clone()));

    let snapshot = ConfigSnapshot::resolve(&config);
    match run_package_cleanup(&snapshot, &factory, &snapshot.worker, Utc::now(), &cancel).await {
        Ok(result) => {
            tracing::info!(
                owners = result.owners_processed,
                owners_failed = result.owners_failed,
                records = result.records_fetched,
                flagged = result.versions_flagged,
                unlisted = result.unlisted,
                unlist_failures = result.unlist_failures,
                skipped_by_limit = result.skipped_by_limit,
                duration_ms = result.duration_ms,
                dry_run = snapshot.worker.dry_run,
                "Package cleanup finished"
            );
        }
        Err(e) => {
            tracing::error!(error = %e, "Package cleanup failed");
            std::process::exit(1);
        }
    }
}

async fn run_worker(config: CleanerConfig, config_path: PathBuf) {
    init_observability(&config);
    let factory = Arc::new(registry_factory(&config));

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_shutdown(cancel.clone()));

    let worker = config.worker.clone();
    let (config_tx, config_rx) = watch::channel(Arc::new(config));
    tokio::spawn(reload_on_hangup(config_path, config_tx, cancel.clone()));

    start_package_cleanup_worker(SnapshotProvider::new(config_rx), factory, worker, cancel).await;
}

/// Cancel `cancel` on Ctrl+C or SIGTERM.
async fn cancel_on_shutdown(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
        _ = cancel.cancelled() => return,
    }

    tracing::info!("Shutdown signal received, stopping after the current registry call...");
    cancel.cancel();
}

/// Re-read the config file on SIGHUP and publish it to the worker.
///
/// A file that fails to load is logged and the previous configuration stays
/// in effect. HTTP settings and the schedule are fixed at startup.
#[cfg(unix)]
async fn reload_on_hangup(
    path: PathBuf,
    config_tx: watch::Sender<Arc<CleanerConfig>>,
    cancel: CancellationToken,
) {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(signal) => signal,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to install SIGHUP handler, reload disabled");
            return;
        }
    };

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            received = hangup.recv() => {
                if received.is_none() {
                    return;
                }
            }
        }

        match CleanerConfig::from_file(&path) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "Reloaded configuration");
                if config_tx.send(Arc::new(config)).is_err() {
                    return;
                }
            }
            Err(e) => {
                tracing::error!(
                    path = %path.display(),
                    error = %e,
                    "Failed to reload configuration, keeping previous"
                );
            }
        }
    }
}

#[cfg(not(unix))]
async fn reload_on_hangup(
    _path: PathBuf,
    _config_tx: watch::Sender<Arc<CleanerConfig>>,
    _cancel: CancellationToken,
) {
}
