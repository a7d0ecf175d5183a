//! Resolved, read-only view of the configuration used by one cleanup run.
//!
//! [`ConfigSnapshot::resolve`] joins package groups with the sources, API
//! keys and cleanup policies they reference, drops groups that cannot be
//! resolved, and nests the rest as source → owner → groups. A run only ever
//! sees a snapshot, never the raw configuration.

mod pattern;
mod provider;

use std::{
    collections::{BTreeMap, HashSet},
    fmt::{self, Write as _},
    sync::Arc,
};

pub use pattern::PackageIdPattern;
pub use provider::SnapshotProvider;

use crate::{
    cleanup::{PackageCleanupPolicy, PackageGroupIndex},
    config::{CleanerConfig, MatchMode, WorkerConfig},
};

/// Configuration resolved for one run.
#[derive(Debug, Clone)]
pub struct ConfigSnapshot {
    /// Sources with at least one resolvable package group, in order of
    /// first use.
    pub sources: Vec<PackageSourceSnapshot>,
    pub worker: WorkerConfig,
    /// Package groups that were dropped and why.
    pub issues: Vec<SnapshotIssue>,
    source_ids: BTreeMap<String, bool>,
    api_key_ids: BTreeMap<String, bool>,
    cleanups: BTreeMap<String, (PackageCleanupPolicy, bool)>,
}

/// One `(source, api key)` pair and the owners processed with it.
#[derive(Clone)]
pub struct PackageSourceSnapshot {
    pub source_id: String,
    pub url: String,
    pub api_key_id: String,
    pub api_key: String,
    /// Shared so a registry filter can hold its owner for a whole fetch.
    pub owners: Vec<Arc<OwnerSnapshot>>,
}

impl fmt::Debug for PackageSourceSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PackageSourceSnapshot")
            .field("source_id", &self.source_id)
            .field("url", &self.url)
            .field("api_key_id", &self.api_key_id)
            .field("owners", &self.owners)
            .finish_non_exhaustive()
    }
}

/// The package groups configured for one owner on one source.
#[derive(Debug, Clone)]
pub struct OwnerSnapshot {
    pub owner: String,
    /// In configuration order; the first matching group wins.
    pub groups: Vec<PackageGroupSnapshot>,
}

/// A package group with its pattern compiled and policy resolved.
#[derive(Debug, Clone)]
pub struct PackageGroupSnapshot {
    pub pattern: PackageIdPattern,
    pub cleanup_id: String,
    pub policy: PackageCleanupPolicy,
    /// Position of the group in `package_groups`.
    pub config_index: usize,
}

/// A package group that could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotIssue {
    pub config_index: usize,
    pub reason: String,
}

impl fmt::Display for SnapshotIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "package_groups[{}]: {}", self.config_index, self.reason)
    }
}

impl OwnerSnapshot {
    /// Whether any group of this owner covers `package_id`.
    pub fn matches_any(&self, package_id: &str) -> bool {
        self.groups.iter().any(|g| g.pattern.is_match(package_id))
    }
}

impl PackageGroupIndex for OwnerSnapshot {
    fn package_group_index(&self, package_id: &str) -> Option<usize> {
        self.groups
            .iter()
            .position(|g| g.pattern.is_match(package_id))
    }
}

impl ConfigSnapshot {
    /// Resolve a configuration into a snapshot.
    ///
    /// Entries with blank ids are ignored. Package groups with a blank or
    /// unknown reference, a blank owner or an invalid pattern are dropped
    /// and reported in [`issues`](Self::issues).
    pub fn resolve(config: &CleanerConfig) -> Self {
        let mut issues = Vec::new();
        let mut sources: Vec<PackageSourceSnapshot> = Vec::new();

        let mut used_sources = HashSet::new();
        let mut used_api_keys = HashSet::new();
        let mut used_cleanups = HashSet::new();

        for (config_index, group) in config.package_groups.iter().enumerate() {
            let mut issue = |reason: String| {
                tracing::warn!(
                    package_group = config_index,
                    owner = %group.owner,
                    pattern = %group.package_id_pattern,
                    reason = %reason,
                    "Skipping package group"
                );
                issues.push(SnapshotIssue {
                    config_index,
                    reason,
                });
            };

            let Some(source) = lookup(&config.sources, &group.source) else {
                issue(missing_reference("source", &group.source));
                continue;
            };
            let Some(api_key) = lookup(&config.api_keys, &group.api_key) else {
                issue(missing_reference("api_key", &group.api_key));
                continue;
            };
            let Some(cleanup) = lookup(&config.cleanups, &group.cleanup) else {
                issue(missing_reference("cleanup", &group.cleanup));
                continue;
            };
            if group.owner.trim().is_empty() {
                issue("owner is blank".to_string());
                continue;
            }
            let pattern = match PackageIdPattern::new(
                &group.package_id_pattern,
                group.match_mode,
                group.ignore_case,
            ) {
                Ok(pattern) => pattern,
                Err(e) => {
                    issue(format!(
                        "invalid package_id_pattern \"{}\": {e}",
                        group.package_id_pattern
                    ));
                    continue;
                }
            };

            used_sources.insert(group.source.as_str());
            used_api_keys.insert(group.api_key.as_str());
            used_cleanups.insert(group.cleanup.as_str());

            let source_index = match sources
                .iter()
                .position(|s| s.source_id == group.source && s.api_key_id == group.api_key)
            {
                Some(idx) => idx,
                None => {
                    sources.push(PackageSourceSnapshot {
                        source_id: group.source.clone(),
                        url: source.url.clone(),
                        api_key_id: group.api_key.clone(),
                        api_key: api_key.key.clone(),
                        owners: Vec::new(),
                    });
                    sources.len() - 1
                }
            };
            let owners = &mut sources[source_index].owners;
            let owner_index = match owners.iter().position(|o| o.owner == group.owner) {
                Some(idx) => idx,
                None => {
                    owners.push(Arc::new(OwnerSnapshot {
                        owner: group.owner.clone(),
                        groups: Vec::new(),
                    }));
                    owners.len() - 1
                }
            };

            Arc::make_mut(&mut owners[owner_index])
                .groups
                .push(PackageGroupSnapshot {
                    pattern,
                    cleanup_id: group.cleanup.clone(),
                    policy: PackageCleanupPolicy::from(cleanup),
                    config_index,
                });
        }

        let cleanups = config
            .cleanups
            .iter()
            .filter(|(id, _)| !id.trim().is_empty())
            .map(|(id, c)| {
                let active = used_cleanups.contains(id.as_str());
                (id.clone(), (PackageCleanupPolicy::from(c), active))
            })
            .collect();

        Self {
            sources,
            worker: config.worker.clone(),
            issues,
            source_ids: active_map(&config.sources, &used_sources),
            api_key_ids: active_map(&config.api_keys, &used_api_keys),
            cleanups,
        }
    }

    /// Total number of resolved package groups.
    pub fn group_count(&self) -> usize {
        self.sources
            .iter()
            .flat_map(|s| &s.owners)
            .map(|o| o.groups.len())
            .sum()
    }

    /// Human-readable listing of the snapshot.
    ///
    /// Sources, API keys and cleanups are listed by id and marked active when
    /// a resolved package group uses them. Key material is never included.
    pub fn summary(&self) -> String {
        let mut out = String::new();

        write_ids(&mut out, "sources", "source", &self.source_ids);
        write_ids(&mut out, "api_keys", "api_key", &self.api_key_ids);

        out.push_str("cleanups:\n");
        if self.cleanups.is_empty() {
            out.push_str("  none\n");
        }
        for (id, (policy, active)) in &self.cleanups {
            let _ = writeln!(
                out,
                "  cleanup \"{id}\" ({}): retain_versions={}, expiry={}h, retain_previews_of_regular_releases={}",
                active_label(*active),
                policy.retain_versions,
                policy.expiry.num_hours(),
                policy.retain_previews_of_regular_releases,
            );
        }

        out.push_str("package_groups:\n");
        if self.group_count() == 0 {
            out.push_str("  none\n");
        }
        for source in &self.sources {
            for owner in &source.owners {
                for group in &owner.groups {
                    let _ = writeln!(
                        out,
                        "  pattern \"{}\" ({})",
                        group.pattern.pattern(),
                        match_mode_label(group.pattern.mode())
                    );
                    let _ = writeln!(out, "    owner: \"{}\"", owner.owner);
                    let _ = writeln!(out, "    source: \"{}\"", source.source_id);
                    let _ = writeln!(out, "    api_key: \"{}\"", source.api_key_id);
                    let _ = writeln!(out, "    cleanup: \"{}\"", group.cleanup_id);
                }
            }
        }

        out
    }
}

fn lookup<'a, T>(items: &'a BTreeMap<String, T>, id: &str) -> Option<&'a T> {
    if id.trim().is_empty() {
        return None;
    }
    items.get(id)
}

fn missing_reference(kind: &str, id: &str) -> String {
    if id.trim().is_empty() {
        format!("{kind} is blank")
    } else {
        format!("unknown {kind} \"{id}\"")
    }
}

fn active_map<T>(items: &BTreeMap<String, T>, used: &HashSet<&str>) -> BTreeMap<String, bool> {
    items
        .keys()
        .filter(|id| !id.trim().is_empty())
        .map(|id| (id.clone(), used.contains(id.as_str())))
        .collect()
}

fn write_ids(out: &mut String, title: &str, label: &str, ids: &BTreeMap<String, bool>) {
    let _ = writeln!(out, "{title}:");
    if ids.is_empty() {
        out.push_str("  none\n");
    }
    for (id, active) in ids {
        let _ = writeln!(out, "  {label} \"{id}\" ({})", active_label(*active));
    }
}

fn active_label(active: bool) -> &'static str {
    if active { "active" } else { "inactive" }
}

fn match_mode_label(mode: MatchMode) -> &'static str {
    match mode {
        MatchMode::Exact => "exact",
        MatchMode::Prefix => "prefix",
        MatchMode::Suffix => "suffix",
        MatchMode::Contains => "contains",
        MatchMode::Wildcard => "wildcard",
        MatchMode::Regex => "regex",
    }
}
