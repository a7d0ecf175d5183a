//! Retention engine.
//!
//! Turns the records of one owner into aggregation trees and decides, for
//! every record, whether the version it describes should be unlisted. Nothing
//! in here performs I/O; the run orchestrator in [`crate::jobs`] feeds it.

mod aggregator;
mod decision;
mod ledger;

pub use aggregator::aggregate;
use chrono::Duration;
pub use decision::should_unlist;
pub use ledger::PublishDateLedger;

use crate::config::CleanupConfig;

/// Maps a package id to the index of the first configured package group
/// whose pattern matches it.
pub trait PackageGroupIndex {
    fn package_group_index(&self, package_id: &str) -> Option<usize>;
}

/// Retention policy applied to one package group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackageCleanupPolicy {
    /// Number of newer listed versions that must remain before an expired
    /// version is unlisted.
    pub retain_versions: u32,
    /// Age after which a version counts as expired.
    pub expiry: Duration,
    /// Keep previews whose regular release has shipped, unless they expire.
    pub retain_previews_of_regular_releases: bool,
}

impl From<&CleanupConfig> for PackageCleanupPolicy {
    fn from(config: &CleanupConfig) -> Self {
        Self {
            retain_versions: config.retain_versions,
            expiry: config.expiry(),
            retain_previews_of_regular_releases: config.retain_previews_of_regular_releases,
        }
    }
}

/// Errors raised by the retention engine and the run orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum CleanupError {
    /// A record reached the ledger although no package group matches it.
    /// This indicates the registry filter and the group lookup disagree.
    #[error("Package '{package_id}' does not match any package group")]
    UnmatchedPackage { package_id: String },

    #[error("Cleanup run cancelled")]
    Cancelled,
}
