//! Per-owner aggregation tree.
//!
//! A tree is built once per owner pass and then only read, apart from
//! [`PackageAggregation::mark_unlisted`]. Positions inside the tree are
//! exchanged as [`PackageAggregationAddress`] values rather than references,
//! so that an address can outlive the borrow used to produce it.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{PackageVersion, PackageVersionRecord};

/// All versions of one package id, ascending by numeric version.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PackageAggregation {
    pub package_id: String,
    pub versions: Vec<VersionAggregation>,
}

/// All records for one numeric version, split by prerelease flag.
///
/// Both lists are strictly ascending by original version string.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VersionAggregation {
    pub version: PackageVersion,
    pub regular_versions: Vec<OriginalVersionAggregation>,
    pub preview_versions: Vec<OriginalVersionAggregation>,
}

/// All records for one published version token.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OriginalVersionAggregation {
    pub original_version: String,
    /// Best-known publish date for this token, shared through the ledger.
    pub publish_date: Option<DateTime<Utc>>,
    /// Ascending by record order, no duplicates.
    pub records: Vec<PackageVersionRecord>,
}

/// Position of one record inside a [`PackageAggregation`].
///
/// Only meaningful for the tree it was produced from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct PackageAggregationAddress {
    pub version_index: usize,
    pub is_preview: bool,
    pub original_version_index: usize,
    pub record_index: usize,
}

impl PackageAggregation {
    pub fn new(package_id: impl Into<String>) -> Self {
        Self {
            package_id: package_id.into(),
            versions: Vec::new(),
        }
    }

    /// Enumerate record addresses in canonical order.
    ///
    /// Versions ascend; within a version, preview entries come before regular
    /// entries, each ascending by original version and then by record.
    pub fn addresses(
        &self,
        include_preview: bool,
        include_regular: bool,
    ) -> impl Iterator<Item = PackageAggregationAddress> + '_ {
        self.versions
            .iter()
            .enumerate()
            .flat_map(move |(version_index, version)| {
                let previews = include_preview
                    .then(move || entry_addresses(version_index, true, &version.preview_versions))
                    .into_iter()
                    .flatten();
                let regulars = include_regular
                    .then(move || entry_addresses(version_index, false, &version.regular_versions))
                    .into_iter()
                    .flatten();
                previews.chain(regulars)
            })
    }

    /// Look up the nodes an address points at.
    ///
    /// # Panics
    ///
    /// Panics if any index of `address` is out of range for this tree. Such an
    /// address was produced from a different or since-modified tree.
    pub fn resolve(
        &self,
        address: PackageAggregationAddress,
    ) -> (
        &VersionAggregation,
        &OriginalVersionAggregation,
        &PackageVersionRecord,
    ) {
        let version = &self.versions[address.version_index];
        let original = &version.entries(address.is_preview)[address.original_version_index];
        let record = &original.records[address.record_index];
        (version, original, record)
    }

    /// Non-panicking variant of [`resolve`](Self::resolve).
    pub fn get(
        &self,
        address: PackageAggregationAddress,
    ) -> Option<(
        &VersionAggregation,
        &OriginalVersionAggregation,
        &PackageVersionRecord,
    )> {
        let version = self.versions.get(address.version_index)?;
        let original = version
            .entries(address.is_preview)
            .get(address.original_version_index)?;
        let record = original.records.get(address.record_index)?;
        Some((version, original, record))
    }

    /// Record that the registry accepted an unlist for the addressed record.
    ///
    /// Flipping the flag does not move the record: listed state is not part
    /// of the key the record list is searched by after the tree is built.
    /// Returns `false` if the address does not resolve.
    pub fn mark_unlisted(&mut self, address: PackageAggregationAddress) -> bool {
        let record = self
            .versions
            .get_mut(address.version_index)
            .and_then(|v| v.entries_mut(address.is_preview).get_mut(address.original_version_index))
            .and_then(|o| o.records.get_mut(address.record_index));

        match record {
            Some(record) => {
                record.is_listed = false;
                true
            }
            None => false,
        }
    }

    /// Total number of records in the tree.
    pub fn record_count(&self) -> usize {
        self.versions
            .iter()
            .flat_map(|v| v.preview_versions.iter().chain(v.regular_versions.iter()))
            .map(|o| o.records.len())
            .sum()
    }
}

impl VersionAggregation {
    pub fn new(version: PackageVersion) -> Self {
        Self {
            version,
            regular_versions: Vec::new(),
            preview_versions: Vec::new(),
        }
    }

    /// The preview or regular entry list.
    pub fn entries(&self, preview: bool) -> &[OriginalVersionAggregation] {
        if preview {
            &self.preview_versions
        } else {
            &self.regular_versions
        }
    }

    pub(crate) fn entries_mut(&mut self, preview: bool) -> &mut Vec<OriginalVersionAggregation> {
        if preview {
            &mut self.preview_versions
        } else {
            &mut self.regular_versions
        }
    }
}

impl OriginalVersionAggregation {
    pub fn new(original_version: impl Into<String>) -> Self {
        Self {
            original_version: original_version.into(),
            publish_date: None,
            records: Vec::new(),
        }
    }
}

fn entry_addresses(
    version_index: usize,
    is_preview: bool,
    entries: &[OriginalVersionAggregation],
) -> impl Iterator<Item = PackageAggregationAddress> + '_ {
    entries
        .iter()
        .enumerate()
        .flat_map(move |(original_version_index, entry)| {
            (0..entry.records.len()).map(move |record_index| PackageAggregationAddress {
                version_index,
                is_preview,
                original_version_index,
                record_index,
            })
        })
}
