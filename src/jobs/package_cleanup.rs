//! Package cleanup worker for unlisting stale package versions.
//!
//! A run walks every `(source, api key)` pair of the snapshot and, for each
//! owner on it:
//! 1. Streams the owner's records for packages covered by a package group
//! 2. Collapses repeated records and aggregates them into per-package trees
//! 3. Evaluates every record address against its group's retention policy
//! 4. Unlists the flagged versions one at a time, in evaluation order
//!
//! Decisions for an owner are all taken before the first unlist, so an
//! unlist never changes the counts of a later decision in the same pass.

use std::{
    collections::{BTreeSet, HashSet},
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use tokio_util::sync::CancellationToken;

use crate::{
    cleanup::{CleanupError, PackageGroupIndex, PublishDateLedger, aggregate, should_unlist},
    config::WorkerConfig,
    models::{PackageAggregation, PackageAggregationAddress, PackageVersionRecord},
    observability::metrics,
    registry::{PackageIdFilter, RegistryAccessor, RegistryAccessorFactory, RegistryError},
    snapshot::{ConfigSnapshot, OwnerSnapshot, PackageSourceSnapshot, SnapshotProvider},
};

/// Results from a single cleanup run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanupRunResult {
    /// Owners whose pass completed.
    pub owners_processed: u64,
    /// Owners whose records could not be fetched.
    pub owners_failed: u64,
    /// Distinct records fetched across all owners.
    pub records_fetched: u64,
    /// Package trees built.
    pub packages_aggregated: u64,
    /// Records the decision engine flagged for unlisting.
    pub versions_flagged: u64,
    /// Versions unlisted (or that would have been, in dry run mode).
    pub unlisted: u64,
    /// Unlist calls that failed.
    pub unlist_failures: u64,
    /// Flagged versions left alone because the per-run limit was reached.
    pub skipped_by_limit: u64,
    /// Duration of the run in milliseconds.
    pub duration_ms: u64,
}

impl CleanupRunResult {
    /// Check if the run changed, or would have changed, anything.
    pub fn has_changes(&self) -> bool {
        self.unlisted > 0
    }
}

/// Starts the package cleanup worker.
///
/// Waits `initial_delay_secs`, then runs once immediately and every
/// `interval_secs` after that until `cancel` fires. Without an interval the
/// worker returns after the first run. Each run picks up the latest
/// configuration snapshot.
pub async fn start_package_cleanup_worker(
    mut provider: SnapshotProvider,
    factory: Arc<dyn RegistryAccessorFactory>,
    worker: WorkerConfig,
    cancel: CancellationToken,
) {
    let dry_run_msg = if worker.dry_run { " (DRY RUN)" } else { "" };

    tracing::info!(
        interval_secs = ?worker.interval_secs,
        initial_delay_secs = worker.initial_delay_secs,
        max_unlists_per_run = worker.max_unlists_per_run,
        dry_run = worker.dry_run,
        "Starting package cleanup worker{}",
        dry_run_msg
    );

    if !sleep_unless_cancelled(worker.initial_delay(), &cancel).await {
        tracing::info!("Package cleanup worker cancelled before first run");
        return;
    }

    loop {
        let snapshot = provider.current();
        let started = Instant::now();
        let now = Utc::now();
        let dry_run_msg = if snapshot.worker.dry_run {
            " (DRY RUN)"
        } else {
            ""
        };

        match run_package_cleanup(&snapshot, factory.as_ref(), &snapshot.worker, now, &cancel).await
        {
            Ok(result) => {
                metrics::record_cleanup_run("completed", started.elapsed().as_secs_f64());
                if result.has_changes() || result.owners_failed > 0 || result.unlist_failures > 0
                {
                    tracing::info!(
                        owners = result.owners_processed,
                        owners_failed = result.owners_failed,
                        records = result.records_fetched,
                        packages = result.packages_aggregated,
                        flagged = result.versions_flagged,
                        unlisted = result.unlisted,
                        unlist_failures = result.unlist_failures,
                        skipped_by_limit = result.skipped_by_limit,
                        duration_ms = result.duration_ms,
                        "Package cleanup run complete{}",
                        dry_run_msg
                    );
                } else {
                    tracing::debug!(
                        owners = result.owners_processed,
                        records = result.records_fetched,
                        duration_ms = result.duration_ms,
                        "Package cleanup run complete, nothing to unlist"
                    );
                }
            }
            Err(CleanupError::Cancelled) => {
                metrics::record_cleanup_run("cancelled", started.elapsed().as_secs_f64());
                tracing::info!("Package cleanup run cancelled");
                return;
            }
            Err(e) => {
                metrics::record_cleanup_run("failed", started.elapsed().as_secs_f64());
                tracing::error!(error = %e, "Error running package cleanup");
            }
        }

        let Some(interval) = worker.interval() else {
            tracing::info!("No interval configured, package cleanup worker exiting");
            return;
        };
        let wait = interval.saturating_sub(started.elapsed());
        if !sleep_unless_cancelled(wait, &cancel).await {
            tracing::info!("Package cleanup worker stopped");
            return;
        }
    }
}

/// Returns `false` if cancelled while waiting.
async fn sleep_unless_cancelled(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

/// Run a single cleanup pass over every owner in the snapshot.
///
/// Fetch failures abort only the affected owner and unlist failures only the
/// affected version; both are counted in the result. Cancellation and
/// records that no package group claims end the run with an error.
pub async fn run_package_cleanup(
    snapshot: &ConfigSnapshot,
    factory: &dyn RegistryAccessorFactory,
    worker: &WorkerConfig,
    now: DateTime<Utc>,
    cancel: &CancellationToken,
) -> Result<CleanupRunResult, CleanupError> {
    let start = Instant::now();
    let mut run = RunState {
        worker,
        now,
        cancel,
        budget: worker.unlist_limit(),
        result: CleanupRunResult::default(),
    };

    for source in &snapshot.sources {
        let accessor = factory.accessor(&source.url, &source.api_key);

        for owner in &source.owners {
            ensure_not_cancelled(cancel)?;
            run.clean_owner(source, owner, accessor.as_ref()).await?;
        }
    }

    run.result.duration_ms = start.elapsed().as_millis() as u64;
    Ok(run.result)
}

struct RunState<'a> {
    worker: &'a WorkerConfig,
    now: DateTime<Utc>,
    cancel: &'a CancellationToken,
    /// Unlist calls left in this run.
    budget: u64,
    result: CleanupRunResult,
}

impl RunState<'_> {
    async fn clean_owner(
        &mut self,
        source: &PackageSourceSnapshot,
        owner: &Arc<OwnerSnapshot>,
        accessor: &dyn RegistryAccessor,
    ) -> Result<(), CleanupError> {
        let records = match fetch_owner_records(accessor, owner, self.cancel).await {
            Ok(records) => records,
            Err(RegistryError::Cancelled) => return Err(CleanupError::Cancelled),
            Err(e) => {
                tracing::error!(
                    source = %source.source_id,
                    owner = %owner.owner,
                    error = %e,
                    "Failed to fetch owner records, skipping owner"
                );
                metrics::record_owner_failure(&source.source_id);
                self.result.owners_failed += 1;
                return Ok(());
            }
        };

        let fetched = records.len() as u64;
        metrics::record_records_fetched(&source.source_id, fetched);
        self.result.records_fetched += fetched;

        let mut ledger = PublishDateLedger::new(owner.as_ref());
        let mut packages = aggregate(records, &mut ledger)?;
        self.result.packages_aggregated += packages.len() as u64;

        tracing::debug!(
            source = %source.source_id,
            owner = %owner.owner,
            records = fetched,
            packages = packages.len(),
            "Aggregated owner records"
        );

        let flagged = self.flag(owner, &packages)?;
        self.result.versions_flagged += flagged.len() as u64;

        self.unlist_flagged(owner, accessor, &mut packages, flagged)
            .await?;

        self.result.owners_processed += 1;
        Ok(())
    }

    /// Evaluate every address of every package in canonical order.
    fn flag(
        &self,
        owner: &OwnerSnapshot,
        packages: &[PackageAggregation],
    ) -> Result<Vec<(usize, PackageAggregationAddress)>, CleanupError> {
        let mut flagged = Vec::new();

        for (package_index, package) in packages.iter().enumerate() {
            ensure_not_cancelled(self.cancel)?;

            let group_index = owner
                .package_group_index(&package.package_id)
                .ok_or_else(|| CleanupError::UnmatchedPackage {
                    package_id: package.package_id.clone(),
                })?;
            let policy = &owner.groups[group_index].policy;

            flagged.extend(
                package
                    .addresses(true, true)
                    .filter(|address| should_unlist(package, *address, policy, self.now))
                    .map(|address| (package_index, address)),
            );
        }

        Ok(flagged)
    }

    async fn unlist_flagged(
        &mut self,
        owner: &OwnerSnapshot,
        accessor: &dyn RegistryAccessor,
        packages: &mut [PackageAggregation],
        flagged: Vec<(usize, PackageAggregationAddress)>,
    ) -> Result<(), CleanupError> {
        // Several records can share one version token; the registry is asked once.
        let mut done: HashSet<(usize, String)> = HashSet::new();
        let mut skipped: HashSet<(usize, String)> = HashSet::new();

        for (package_index, address) in flagged {
            ensure_not_cancelled(self.cancel)?;

            let package = &mut packages[package_index];
            let (_, original, _) = package.resolve(address);
            let version = original.original_version.clone();
            let package_id = package.package_id.clone();

            if done.contains(&(package_index, version.clone())) {
                package.mark_unlisted(address);
                continue;
            }

            if self.budget == 0 {
                if !skipped.insert((package_index, version.clone())) {
                    continue;
                }
                tracing::debug!(
                    owner = %owner.owner,
                    package_id = %package_id,
                    version = %version,
                    "Unlist limit reached, leaving version listed"
                );
                metrics::record_unlist("skipped_limit");
                self.result.skipped_by_limit += 1;
                continue;
            }

            if self.worker.dry_run {
                tracing::info!(
                    owner = %owner.owner,
                    package_id = %package_id,
                    version = %version,
                    "DRY RUN: Would unlist package version"
                );
                metrics::record_unlist("dry_run");
                self.budget -= 1;
                self.result.unlisted += 1;
                done.insert((package_index, version));
                continue;
            }

            self.budget -= 1;
            match accessor.unlist(&package_id, &version, self.cancel).await {
                Ok(()) => {
                    tracing::info!(
                        owner = %owner.owner,
                        package_id = %package_id,
                        version = %version,
                        "Unlisted package version"
                    );
                    metrics::record_unlist("unlisted");
                    package.mark_unlisted(address);
                    self.result.unlisted += 1;
                    done.insert((package_index, version));
                }
                Err(RegistryError::Cancelled) => return Err(CleanupError::Cancelled),
                Err(e) => {
                    tracing::warn!(
                        owner = %owner.owner,
                        package_id = %package_id,
                        version = %version,
                        error = %e,
                        "Failed to unlist package version"
                    );
                    metrics::record_unlist("failed");
                    self.result.unlist_failures += 1;
                }
            }
        }

        Ok(())
    }
}

/// Fetch the owner's records restricted to its package groups.
///
/// Repeated records collapse; the set's order makes the pass deterministic.
async fn fetch_owner_records(
    accessor: &dyn RegistryAccessor,
    owner: &Arc<OwnerSnapshot>,
    cancel: &CancellationToken,
) -> Result<BTreeSet<PackageVersionRecord>, RegistryError> {
    let groups = Arc::clone(owner);
    let filter: PackageIdFilter = Arc::new(move |package_id: &str| groups.matches_any(package_id));

    let mut stream = accessor.owner_records(&owner.owner, filter, cancel);
    let mut records = BTreeSet::new();
    while let Some(record) = stream.try_next().await? {
        records.insert(record);
    }
    Ok(records)
}

fn ensure_not_cancelled(cancel: &CancellationToken) -> Result<(), CleanupError> {
    if cancel.is_cancelled() {
        return Err(CleanupError::Cancelled);
    }
    Ok(())
}
