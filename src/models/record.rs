use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::PackageVersion;

/// One observed fact about a package version, as reported by a registry.
///
/// `version` and `original_version` are optional because registries can
/// report rows that lack them; such records never enter an aggregation tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PackageVersionRecord {
    pub package_id: String,
    /// Owners as reported by the registry (comma separated).
    pub owners: String,
    pub is_listed: bool,
    pub is_deprecated: bool,
    pub publish_date: Option<DateTime<Utc>>,
    pub version: Option<PackageVersion>,
    /// The exact version token as published, e.g. `1.1.0-pre1`.
    pub original_version: Option<String>,
    pub is_prerelease: bool,
}

impl PackageVersionRecord {
    /// Build a record from a registry version token.
    ///
    /// The numeric version and prerelease flag are derived from the token.
    pub fn from_token(
        package_id: impl Into<String>,
        owners: impl Into<String>,
        original_version: impl Into<String>,
        publish_date: Option<DateTime<Utc>>,
        is_listed: bool,
        is_deprecated: bool,
    ) -> Self {
        let original_version = original_version.into();
        Self {
            package_id: package_id.into(),
            owners: owners.into(),
            is_listed,
            is_deprecated,
            publish_date,
            version: PackageVersion::parse(&original_version),
            is_prerelease: super::is_prerelease_token(&original_version),
            original_version: Some(original_version),
        }
    }

    /// Whether the record carries everything needed to be placed in a tree.
    pub fn is_indexable(&self) -> bool {
        self.version.is_some() && self.original_version.is_some()
    }

    fn cmp_original_version(&self, other: &Self) -> Ordering {
        match (self.is_prerelease, other.is_prerelease) {
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            _ => self.original_version.cmp(&other.original_version),
        }
    }
}

impl Ord for PackageVersionRecord {
    fn cmp(&self, other: &Self) -> Ordering {
        self.package_id
            .cmp(&other.package_id)
            .then_with(|| self.version.cmp(&other.version))
            // None sorts before any date
            .then_with(|| self.publish_date.cmp(&other.publish_date))
            .then_with(|| self.cmp_original_version(other))
            .then_with(|| self.is_listed.cmp(&other.is_listed))
            .then_with(|| self.is_deprecated.cmp(&other.is_deprecated))
            .then_with(|| self.owners.cmp(&other.owners))
    }
}

impl PartialOrd for PackageVersionRecord {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
