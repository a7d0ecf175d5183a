use std::collections::HashMap;

use super::{CleanupError, PublishDateLedger};
use crate::models::{
    OriginalVersionAggregation, PackageAggregation, PackageVersionRecord, VersionAggregation,
};

/// Build aggregation trees from an owner's records.
///
/// Packages appear in the order their id was first seen. Records without a
/// numeric version or version token are skipped, and records equal to one
/// already in the tree are dropped.
pub fn aggregate<I>(
    records: I,
    ledger: &mut PublishDateLedger<'_>,
) -> Result<Vec<PackageAggregation>, CleanupError>
where
    I: IntoIterator<Item = PackageVersionRecord>,
{
    let mut packages: Vec<PackageAggregation> = Vec::new();
    let mut index_by_id: HashMap<String, usize> = HashMap::new();

    for record in records {
        let (Some(version), Some(original_version)) =
            (record.version, record.original_version.clone())
        else {
            tracing::trace!(
                package_id = %record.package_id,
                "Skipping record without a parsable version"
            );
            continue;
        };

        let package_index = *index_by_id
            .entry(record.package_id.clone())
            .or_insert_with(|| {
                packages.push(PackageAggregation::new(record.package_id.clone()));
                packages.len() - 1
            });
        let package = &mut packages[package_index];

        let version_index = match package
            .versions
            .binary_search_by(|v| v.version.cmp(&version))
        {
            Ok(idx) => idx,
            Err(idx) => {
                package
                    .versions
                    .insert(idx, VersionAggregation::new(version));
                idx
            }
        };

        let entries = package.versions[version_index].entries_mut(record.is_prerelease);
        let entry_index = match entries
            .binary_search_by(|e| e.original_version.as_str().cmp(original_version.as_str()))
        {
            Ok(idx) => idx,
            Err(idx) => {
                entries.insert(idx, OriginalVersionAggregation::new(original_version.clone()));
                idx
            }
        };
        let entry = &mut entries[entry_index];

        entry.publish_date = ledger.resolve_for_package(
            &record.package_id,
            version,
            &original_version,
            record.publish_date,
        )?;

        if let Err(idx) = entry.records.binary_search(&record) {
            entry.records.insert(idx, record);
        }
    }

    Ok(packages)
}
