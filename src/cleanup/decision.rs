use chrono::{DateTime, Utc};

use super::PackageCleanupPolicy;
use crate::models::{
    OriginalVersionAggregation, PackageAggregation, PackageAggregationAddress,
    PackageVersionRecord,
};

/// Decide whether the record at `address` should be unlisted.
///
/// Previews are unlisted once they are expired (or deprecated) and either a
/// regular release of the same or a later version exists or enough newer
/// previews remain. Unless previews of released versions are retained, any
/// newer regular release unlists them outright. Regular versions are
/// unlisted once expired (or deprecated) with at least `retain_versions`
/// newer listed regular records remaining.
///
/// Newer records are counted by listing state only; their deprecation is
/// not considered.
///
/// # Panics
///
/// Panics if `address` does not belong to `tree`.
pub fn should_unlist(
    tree: &PackageAggregation,
    address: PackageAggregationAddress,
    policy: &PackageCleanupPolicy,
    now: DateTime<Utc>,
) -> bool {
    let (_, original, record) = tree.resolve(address);

    if !record.is_listed {
        return false;
    }

    let retain = policy.retain_versions as usize;

    if address.is_preview {
        let newer_preview = count_newer(tree, address, true);
        let newer_regular = count_listed_from(tree, address.version_index, false);

        (is_expired_or_deprecated(original, record, policy, now)
            && (newer_regular > 0 || newer_preview >= retain))
            || (!policy.retain_previews_of_regular_releases && newer_regular > 0)
    } else {
        is_expired_or_deprecated(original, record, policy, now)
            && count_newer(tree, address, false) >= retain
    }
}

fn is_expired_or_deprecated(
    original: &OriginalVersionAggregation,
    record: &PackageVersionRecord,
    policy: &PackageCleanupPolicy,
    now: DateTime<Utc>,
) -> bool {
    if record.is_deprecated {
        return true;
    }

    original
        .publish_date
        .and_then(|published| published.checked_add_signed(policy.expiry))
        .is_some_and(|expires| expires <= now)
}

/// Listed records of the address's category after the address.
///
/// Inside the address's own version every entry from the address's entry
/// onward skips its first `record_index + 1` records; later versions count
/// in full.
fn count_newer(
    tree: &PackageAggregation,
    address: PackageAggregationAddress,
    preview: bool,
) -> usize {
    let same_version = tree.versions[address.version_index]
        .entries(preview)
        .iter()
        .skip(address.original_version_index)
        .flat_map(|e| e.records.iter().skip(address.record_index + 1))
        .filter(|r| r.is_listed)
        .count();

    same_version + count_listed_from(tree, address.version_index + 1, preview)
}

/// Listed records of one category in every version from `version_index` on.
fn count_listed_from(tree: &PackageAggregation, version_index: usize, preview: bool) -> usize {
    tree.versions
        .iter()
        .skip(version_index)
        .flat_map(|v| v.entries(preview))
        .flat_map(|e| e.records.iter())
        .filter(|r| r.is_listed)
        .count()
}
