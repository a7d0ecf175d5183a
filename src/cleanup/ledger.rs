use std::collections::HashMap;

use chrono::{DateTime, Utc};

use super::{CleanupError, PackageGroupIndex};
use crate::models::PackageVersion;

type LedgerKey = (usize, PackageVersion, String);

/// Latest publish date seen per `(package group, version, version token)`.
///
/// Keys use the package group rather than the package id, so every package
/// governed by the same group shares one date per version. A stored date
/// never decreases.
pub struct PublishDateLedger<'a> {
    groups: &'a dyn PackageGroupIndex,
    dates: HashMap<LedgerKey, DateTime<Utc>>,
}

impl<'a> PublishDateLedger<'a> {
    pub fn new(groups: &'a dyn PackageGroupIndex) -> Self {
        Self {
            groups,
            dates: HashMap::new(),
        }
    }

    /// Merge an observed publish date into the ledger and return the best
    /// known date for the key.
    ///
    /// An absent observation only reads.
    pub fn resolve(
        &mut self,
        group_index: usize,
        version: PackageVersion,
        original_version: &str,
        observed: Option<DateTime<Utc>>,
    ) -> Option<DateTime<Utc>> {
        let key = (group_index, version, original_version.to_owned());

        let Some(observed) = observed else {
            return self.dates.get(&key).copied();
        };

        let stored = self.dates.entry(key).or_insert(observed);
        if observed > *stored {
            *stored = observed;
        }
        Some(*stored)
    }

    /// Like [`resolve`](Self::resolve), looking up the package group first.
    pub fn resolve_for_package(
        &mut self,
        package_id: &str,
        version: PackageVersion,
        original_version: &str,
        observed: Option<DateTime<Utc>>,
    ) -> Result<Option<DateTime<Utc>>, CleanupError> {
        let group_index = self.groups.package_group_index(package_id).ok_or_else(|| {
            CleanupError::UnmatchedPackage {
                package_id: package_id.to_owned(),
            }
        })?;
        Ok(self.resolve(group_index, version, original_version, observed))
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }
}
