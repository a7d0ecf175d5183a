//! Configuration module for the package cleaner.
//!
//! The cleaner is configured via a TOML file, with support for environment
//! variable interpolation using `${VAR_NAME}` syntax.
//!
//! # Example
//!
//! ```toml
//! [worker]
//! interval_secs = 86400
//!
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

mod observability;
mod packages;
mod registry;
mod worker;

use std::{collections::BTreeMap, path::Path, sync::LazyLock};

pub use observability::*;
pub use packages::*;
pub use registry::*;
use serde::{Deserialize, Serialize};
pub use worker::*;

/// Root configuration for the package cleaner.
///
/// References between sections (a package group naming a source, API key or
/// cleanup) are not checked here. Groups with broken references are skipped
/// when the configuration is resolved into a
/// [`ConfigSnapshot`](crate::snapshot::ConfigSnapshot).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CleanerConfig {
    /// Scheduling and safety limits.
    #[serde(default)]
    pub worker: WorkerConfig,

    /// HTTP client settings for registry access.
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Package feeds, by id.
    #[serde(default)]
    pub sources: BTreeMap<String, SourceConfig>,

    /// API keys, by id.
    #[serde(default)]
    pub api_keys: BTreeMap<String, ApiKeyConfig>,

    /// Retention policies, by id.
    #[serde(default)]
    pub cleanups: BTreeMap<String, CleanupConfig>,

    /// Package groups, in priority order.
    #[serde(default)]
    pub package_groups: Vec<PackageGroupConfig>,

    /// Observability configuration (logging, metrics).
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl CleanerConfig {
    /// Load configuration from a TOML file.
    ///
    /// Environment variables in the format `${VAR_NAME}` are expanded.
    /// Missing required variables will cause an error.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(e, path.as_ref().to_path_buf()))?;

        Self::from_str(&contents)
    }

    /// Parse configuration from a TOML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(contents: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(contents)?;

        let config: CleanerConfig = toml::from_str(&expanded).map_err(ConfigError::Parse)?;
        config.validate()?;

        Ok(config)
    }

    /// Validate values that can never work, regardless of references.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.worker.validate().map_err(ConfigError::Validation)?;
        self.registry.validate().map_err(ConfigError::Validation)?;

        #[cfg(not(feature = "prometheus"))]
        if self.observability.metrics.enabled {
            return Err(ConfigError::Validation(
                "observability.metrics.enabled requires the 'prometheus' feature".into(),
            ));
        }

        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {1}: {0}")]
    Io(std::io::Error, std::path::PathBuf),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),
}

static ENV_VAR_PATTERN: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"\$\{([^}]+)\}").expect("env var pattern is a valid regex")
});

/// Expand environment variables in the format `${VAR_NAME}`.
/// Variables after a `#` on the same line are left untouched.
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut result = String::with_capacity(input.len());

    for line in input.lines() {
        let comment_pos = line.find('#');
        let mut last_end = 0;

        for cap in ENV_VAR_PATTERN.captures_iter(line) {
            let Some(whole) = cap.get(0) else { continue };

            if comment_pos.is_some_and(|pos| whole.start() >= pos) {
                continue;
            }

            result.push_str(&line[last_end..whole.start()]);

            let var_name = &cap[1];
            let value = std::env::var(var_name)
                .map_err(|_| ConfigError::EnvVarNotFound(var_name.to_string()))?;
            result.push_str(&value);

            last_end = whole.end();
        }

        result.push_str(&line[last_end..]);
        result.push('\n');
    }

    // Remove trailing newline if input didn't have one
    if !input.ends_with('\n') && result.ends_with('\n') {
        result.pop();
    }

    Ok(result)
}
