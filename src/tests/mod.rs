//! End-to-end tests of cleanup runs against the in-memory registry.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use futures::stream::BoxStream;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::{
    cleanup::CleanupError,
    config::CleanerConfig,
    jobs::{CleanupRunResult, run_package_cleanup, start_package_cleanup_worker},
    models::PackageVersionRecord,
    registry::{
        MemoryRegistry, MemoryRegistryFactory, PackageIdFilter, RegistryAccessor,
        RegistryAccessorFactory, RegistryError,
    },
    snapshot::{ConfigSnapshot, SnapshotProvider},
};

const FEED: &str = "memory://feed";
const PACKAGE: &str = "My.Packages.A";

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2000, 2, 1, 0, 0, 0).unwrap()
}

fn record(package_id: &str, owners: &str, version: &str, days_ago: i64) -> PackageVersionRecord {
    PackageVersionRecord::from_token(
        package_id,
        owners,
        version,
        Some(now() - Duration::days(days_ago)),
        true,
        false,
    )
}

/// `(version, days before now, listed after a cleanup with retain 2 and a
/// 10 day expiry)`
const REFERENCE: &[(&str, i64, bool)] = &[
    ("1.0.0", 31, false),
    ("1.1.0-pre1", 22, false),
    ("1.1.0-pre2", 12, false),
    ("1.1.0", 11, true),
    ("1.2.0-pre1", 10, false),
    ("1.2.0", 2, true),
    ("1.3.0-pre1", 1, true),
];

fn reference_records() -> Vec<PackageVersionRecord> {
    let mut records: Vec<_> = REFERENCE
        .iter()
        .map(|(version, days, _)| record(PACKAGE, "Me", version, *days))
        .collect();
    records.push(record("OtherPackage", "Me", "0.0.0", 31));
    records
}

fn config(worker: &str, owners: &[&str]) -> CleanerConfig {
    let mut toml = format!(
        r#"
        [worker]
        {worker}

        [sources.feed]
        url = "{FEED}"

        [api_keys.main]
        key = "key"

        [cleanups.default]
        retain_versions = 2
        expiry_days = 10
        "#
    );
    for owner in owners {
        toml.push_str(&format!(
            r#"
            [[package_groups]]
            source = "feed"
            api_key = "main"
            owner = "{owner}"
            package_id_pattern = "My.Packages*"
            cleanup = "default"
            "#
        ));
    }
    CleanerConfig::from_str(&toml).unwrap()
}

async fn run(
    registry: &MemoryRegistry,
    config: &CleanerConfig,
) -> Result<CleanupRunResult, CleanupError> {
    let snapshot = ConfigSnapshot::resolve(config);
    let factory = MemoryRegistryFactory::new().with_source(FEED, registry.clone());
    run_package_cleanup(
        &snapshot,
        &factory,
        &snapshot.worker,
        now(),
        &CancellationToken::new(),
    )
    .await
}

async fn listed(registry: &MemoryRegistry, package_id: &str, version: &str) -> bool {
    registry
        .is_listed(package_id, version)
        .await
        .unwrap_or_else(|| panic!("{package_id} {version} not published"))
}

#[tokio::test]
async fn test_reference_scenario_unlists_expected_versions() {
    let registry = MemoryRegistry::new(reference_records()).with_api_key("key");

    let result = run(&registry, &config("", &["Me"])).await.unwrap();

    for (version, _, expected) in REFERENCE {
        assert_eq!(
            listed(&registry, PACKAGE, version).await,
            *expected,
            "listed state of {version}"
        );
    }
    assert!(listed(&registry, "OtherPackage", "0.0.0").await);

    assert_eq!(result.owners_processed, 1);
    assert_eq!(result.owners_failed, 0);
    assert_eq!(result.records_fetched, 7);
    assert_eq!(result.packages_aggregated, 1);
    assert_eq!(result.versions_flagged, 4);
    assert_eq!(result.unlisted, 4);
    assert!(result.has_changes());

    let unlists: Vec<_> = registry
        .unlists()
        .await
        .into_iter()
        .map(|(_, version)| version)
        .collect();
    assert_eq!(unlists, vec!["1.0.0", "1.1.0-pre1", "1.1.0-pre2", "1.2.0-pre1"]);
}

#[tokio::test]
async fn test_second_run_finds_nothing_to_unlist() {
    let registry = MemoryRegistry::new(reference_records());
    let config = config("", &["Me"]);

    run(&registry, &config).await.unwrap();
    let second = run(&registry, &config).await.unwrap();

    assert_eq!(second.versions_flagged, 0);
    assert!(!second.has_changes());
    assert_eq!(registry.unlists().await.len(), 4);
}

#[tokio::test]
async fn test_repeated_records_are_unlisted_once() {
    let mut records = reference_records();
    records.extend(reference_records());
    let registry = MemoryRegistry::new(records);

    let result = run(&registry, &config("", &["Me"])).await.unwrap();

    assert_eq!(result.records_fetched, 7);
    assert_eq!(registry.unlists().await.len(), 4);
}

#[tokio::test]
async fn test_dry_run_leaves_registry_untouched() {
    let registry = MemoryRegistry::new(reference_records());

    let result = run(&registry, &config("dry_run = true", &["Me"]))
        .await
        .unwrap();

    assert_eq!(result.unlisted, 4);
    assert!(registry.unlists().await.is_empty());
    for (version, _, _) in REFERENCE {
        assert!(listed(&registry, PACKAGE, version).await);
    }
}

#[tokio::test]
async fn test_unlist_limit_stops_in_canonical_order() {
    let registry = MemoryRegistry::new(reference_records());

    let result = run(&registry, &config("max_unlists_per_run = 1", &["Me"]))
        .await
        .unwrap();

    assert_eq!(result.versions_flagged, 4);
    assert_eq!(result.unlisted, 1);
    assert_eq!(result.skipped_by_limit, 3);
    assert!(!listed(&registry, PACKAGE, "1.0.0").await);
    assert!(listed(&registry, PACKAGE, "1.1.0-pre1").await);
}

#[tokio::test]
async fn test_unlist_failure_skips_only_that_version() {
    let registry = MemoryRegistry::new(reference_records());
    registry.fail_unlist_of(PACKAGE, "1.1.0-pre1").await;

    let result = run(&registry, &config("", &["Me"])).await.unwrap();

    assert_eq!(result.unlist_failures, 1);
    assert_eq!(result.unlisted, 3);
    assert_eq!(result.owners_processed, 1);
    assert!(listed(&registry, PACKAGE, "1.1.0-pre1").await);
    assert!(!listed(&registry, PACKAGE, "1.2.0-pre1").await);
}

#[tokio::test]
async fn test_rejected_api_key_counts_as_unlist_failures() {
    let registry = MemoryRegistry::new(reference_records()).with_api_key("other");

    let result = run(&registry, &config("", &["Me"])).await.unwrap();

    assert_eq!(result.unlist_failures, 4);
    assert_eq!(result.unlisted, 0);
}

#[tokio::test]
async fn test_fetch_failure_only_aborts_that_owner() {
    let mut records = reference_records();
    records.push(record("My.Packages.B", "You", "1.0.0", 40));
    records.push(record("My.Packages.B", "You", "2.0.0", 30));
    records.push(record("My.Packages.B", "You", "3.0.0", 20));
    let registry = MemoryRegistry::new(records);
    registry.fail_fetches_for("Me").await;

    let result = run(&registry, &config("", &["Me", "You"])).await.unwrap();

    assert_eq!(result.owners_failed, 1);
    assert_eq!(result.owners_processed, 1);
    assert!(listed(&registry, PACKAGE, "1.0.0").await);
    assert!(!listed(&registry, "My.Packages.B", "1.0.0").await);
    assert!(listed(&registry, "My.Packages.B", "2.0.0").await);
}

#[tokio::test]
async fn test_packages_of_one_group_share_publish_dates() {
    // B's 2.0.0 carries no date; A's 2.0.0 in the same group supplies it.
    let mut records = vec![
        record("My.Packages.A", "Me", "1.0.0", 30),
        record("My.Packages.A", "Me", "2.0.0", 20),
        record("My.Packages.B", "Me", "1.0.0", 30),
        record("My.Packages.B", "Me", "3.0.0", 1),
    ];
    records.push(PackageVersionRecord::from_token(
        "My.Packages.B",
        "Me",
        "2.0.0",
        None,
        true,
        false,
    ));
    let registry = MemoryRegistry::new(records);
    let config = CleanerConfig::from_str(&format!(
        r#"
        [sources.feed]
        url = "{FEED}"
        [api_keys.main]
        key = "key"
        [cleanups.default]
        retain_versions = 1
        expiry_days = 10
        [[package_groups]]
        source = "feed"
        api_key = "main"
        owner = "Me"
        package_id_pattern = "My.Packages*"
        cleanup = "default"
        "#
    ))
    .unwrap();

    run(&registry, &config).await.unwrap();

    assert!(!listed(&registry, "My.Packages.B", "1.0.0").await);
    assert!(!listed(&registry, "My.Packages.B", "2.0.0").await);
    assert!(listed(&registry, "My.Packages.B", "3.0.0").await);
}

#[tokio::test]
async fn test_cancelled_run_makes_no_calls() {
    let registry = MemoryRegistry::new(reference_records());
    let snapshot = ConfigSnapshot::resolve(&config("", &["Me"]));
    let factory = MemoryRegistryFactory::new().with_source(FEED, registry.clone());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = run_package_cleanup(&snapshot, &factory, &snapshot.worker, now(), &cancel).await;

    assert!(matches!(result, Err(CleanupError::Cancelled)));
    assert!(registry.unlists().await.is_empty());
}

/// Cancels a token once its first unlist has reached the registry.
struct CancelAfterFirstUnlist {
    registry: MemoryRegistry,
    cancel: CancellationToken,
}

#[async_trait]
impl RegistryAccessor for CancelAfterFirstUnlist {
    fn owner_records<'a>(
        &'a self,
        owner: &'a str,
        filter: PackageIdFilter,
        cancel: &'a CancellationToken,
    ) -> BoxStream<'a, Result<PackageVersionRecord, RegistryError>> {
        self.registry.owner_records(owner, filter, cancel)
    }

    async fn unlist(
        &self,
        package_id: &str,
        original_version: &str,
        cancel: &CancellationToken,
    ) -> Result<(), RegistryError> {
        let result = self
            .registry
            .unlist(package_id, original_version, cancel)
            .await;
        self.cancel.cancel();
        result
    }
}

impl RegistryAccessorFactory for CancelAfterFirstUnlist {
    fn accessor(&self, _source_url: &str, _api_key: &str) -> Arc<dyn RegistryAccessor> {
        Arc::new(CancelAfterFirstUnlist {
            registry: self.registry.clone(),
            cancel: self.cancel.clone(),
        })
    }
}

#[tokio::test]
async fn test_cancellation_during_unlist_stops_before_next_call() {
    let registry = MemoryRegistry::new(reference_records());
    let snapshot = ConfigSnapshot::resolve(&config("", &["Me"]));
    let cancel = CancellationToken::new();
    let factory = CancelAfterFirstUnlist {
        registry: registry.clone(),
        cancel: cancel.clone(),
    };

    let result = run_package_cleanup(&snapshot, &factory, &snapshot.worker, now(), &cancel).await;

    assert!(matches!(result, Err(CleanupError::Cancelled)));
    assert_eq!(
        registry.unlists().await,
        vec![(PACKAGE.to_string(), "1.0.0".to_string())]
    );
    assert!(!listed(&registry, PACKAGE, "1.0.0").await);
    assert!(listed(&registry, PACKAGE, "1.1.0-pre1").await);
}

#[tokio::test]
async fn test_limit_skips_count_versions_not_records() {
    // Each expired version is reported twice, under different owner strings.
    let registry = MemoryRegistry::new(vec![
        record(PACKAGE, "Me", "1.0.0", 30),
        record(PACKAGE, "Me, You", "1.0.0", 30),
        record(PACKAGE, "Me", "2.0.0", 25),
        record(PACKAGE, "Me, You", "2.0.0", 25),
        record(PACKAGE, "Me", "3.0.0", 1),
    ]);
    let mut config = config("max_unlists_per_run = 1", &["Me"]);
    config.cleanups.get_mut("default").unwrap().retain_versions = 1;

    let result = run(&registry, &config).await.unwrap();

    assert_eq!(result.records_fetched, 5);
    assert_eq!(result.versions_flagged, 4);
    assert_eq!(result.unlisted, 1);
    assert_eq!(result.skipped_by_limit, 1);
    assert!(!listed(&registry, PACKAGE, "1.0.0").await);
    assert!(listed(&registry, PACKAGE, "2.0.0").await);
}

#[tokio::test]
async fn test_worker_without_interval_runs_once() {
    let registry = MemoryRegistry::new(vec![
        record(PACKAGE, "Me", "1.0.0", 400),
        record(PACKAGE, "Me", "2.0.0", 300),
        record(PACKAGE, "Me", "3.0.0", 200),
    ]);
    let config = config("", &["Me"]);
    let worker = config.worker.clone();
    let (_tx, rx) = watch::channel(Arc::new(config));
    let factory = Arc::new(MemoryRegistryFactory::new().with_source(FEED, registry.clone()));

    start_package_cleanup_worker(
        SnapshotProvider::new(rx),
        factory,
        worker,
        CancellationToken::new(),
    )
    .await;

    assert_eq!(
        registry.unlists().await,
        vec![(PACKAGE.to_string(), "1.0.0".to_string())]
    );
}

#[tokio::test]
async fn test_cancelled_worker_returns_before_first_run() {
    let registry = MemoryRegistry::new(reference_records());
    let config = config("interval_secs = 3600\ninitial_delay_secs = 3600", &["Me"]);
    let worker = config.worker.clone();
    let (_tx, rx) = watch::channel(Arc::new(config));
    let factory = Arc::new(MemoryRegistryFactory::new().with_source(FEED, registry.clone()));
    let cancel = CancellationToken::new();
    cancel.cancel();

    start_package_cleanup_worker(SnapshotProvider::new(rx), factory, worker, cancel).await;

    assert!(registry.unlists().await.is_empty());
}
