//! Package sources, credentials, retention policies and package groups.
//!
//! Sources, API keys and cleanup policies are declared once under an id and
//! referenced by id from package groups. A package group ties an owner on a
//! source to a package id pattern and the policy applied to matching
//! packages.
//!
//! # Example
//!
//! ```toml
//! [sources.nuget]
//! url = "https://api.nuget.org/v3/index.json"
//!
//! [api_keys.main]
//! key = "${NUGET_API_KEY}"
//!
//! [cleanups.default]
//! retain_versions = 2
//! expiry_days = 10
//!
//! [[package_groups]]
//! source = "nuget"
//! api_key = "main"
//! owner = "me"
//! package_id_pattern = "My.Packages*"
//! cleanup = "default"
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

/// A NuGet V3 feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    /// Service index URL.
    #[serde(default = "default_source_url")]
    pub url: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: default_source_url(),
        }
    }
}

fn default_source_url() -> String {
    "https://api.nuget.org/v3/index.json".to_string()
}

/// An API key used to unlist packages.
#[derive(Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApiKeyConfig {
    pub key: String,
}

impl fmt::Debug for ApiKeyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiKeyConfig")
            .field("key", &"****")
            .finish()
    }
}

/// A retention policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CleanupConfig {
    /// Newer listed versions that must remain before an expired version is
    /// unlisted.
    pub retain_versions: u32,

    /// Days after publishing at which a version expires.
    #[serde(default)]
    pub expiry_days: u32,

    /// Hours added to `expiry_days`.
    #[serde(default)]
    pub expiry_hours: u32,

    /// Keep previews of versions that already have a regular release,
    /// until they expire.
    #[serde(default)]
    pub retain_previews_of_regular_releases: bool,
}

impl CleanupConfig {
    pub fn expiry(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.expiry_days))
            + chrono::Duration::hours(i64::from(self.expiry_hours))
    }
}

/// How a package group's pattern is compared with package ids.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// Whole id equals the pattern.
    Exact,
    /// Id starts with the pattern.
    Prefix,
    /// Id ends with the pattern.
    Suffix,
    /// Id contains the pattern.
    Contains,
    /// `*` matches any run of characters, `?` a single character.
    #[default]
    Wildcard,
    /// Regular expression, anchored at both ends.
    Regex,
}

/// Binds an owner on a source to a package id pattern and cleanup policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PackageGroupConfig {
    /// Id of an entry in `[sources]`.
    #[serde(default)]
    pub source: String,

    /// Id of an entry in `[api_keys]`.
    #[serde(default)]
    pub api_key: String,

    /// Registry account whose packages are processed.
    pub owner: String,

    pub package_id_pattern: String,

    #[serde(default)]
    pub match_mode: MatchMode,

    /// Compare ids case-insensitively. NuGet ids are case-insensitive.
    #[serde(default = "default_true")]
    pub ignore_case: bool,

    /// Id of an entry in `[cleanups]`.
    #[serde(default)]
    pub cleanup: String,
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cleanup_expiry_adds_hours() {
        let config: CleanupConfig = toml::from_str(
            r#"
            retain_versions = 1
            expiry_days = 2
            expiry_hours = 6
        "#,
        )
        .unwrap();
        assert_eq!(config.expiry(), chrono::Duration::hours(54));
        assert!(!config.retain_previews_of_regular_releases);
    }

    #[test]
    fn test_cleanup_requires_retain_versions() {
        let result: Result<CleanupConfig, _> = toml::from_str("expiry_days = 2");
        assert!(result.is_err());
    }

    #[test]
    fn test_package_group_defaults() {
        let group: PackageGroupConfig = toml::from_str(
            r#"
            owner = "me"
            package_id_pattern = "My.*"
        "#,
        )
        .unwrap();
        assert_eq!(group.match_mode, MatchMode::Wildcard);
        assert!(group.ignore_case);
        assert!(group.source.is_empty());
    }

    #[test]
    fn test_api_key_debug_is_redacted() {
        let key = ApiKeyConfig {
            key: "oy2secret".into(),
        };
        let debug = format!("{key:?}");
        assert!(!debug.contains("oy2secret"));
    }

    #[test]
    fn test_source_default_url() {
        let source: SourceConfig = toml::from_str("").unwrap();
        assert_eq!(source.url, "https://api.nuget.org/v3/index.json");
    }
}
