use std::fmt;

use serde::{Deserialize, Serialize};

/// Numeric package version with four components.
///
/// Ordering is component-wise (major, then minor, then build, then revision),
/// which is the order the aggregation tree keeps its versions in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PackageVersion {
    pub major: u32,
    pub minor: u32,
    pub build: u32,
    pub revision: u32,
}

impl PackageVersion {
    pub const fn new(major: u32, minor: u32, build: u32, revision: u32) -> Self {
        Self {
            major,
            minor,
            build,
            revision,
        }
    }

    /// Parse the numeric part of a registry version string.
    ///
    /// Build metadata (`+...`) and the prerelease label (`-...`) are ignored.
    /// Between one and four dot-separated numeric components are accepted;
    /// missing components are zero.
    pub fn parse(input: &str) -> Option<Self> {
        let (numeric, _) = split_version(input);
        if numeric.is_empty() {
            return None;
        }

        let mut parts = [0u32; 4];
        let mut count = 0;
        for component in numeric.split('.') {
            if count == parts.len() {
                return None;
            }
            if component.is_empty() || !component.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            parts[count] = component.parse().ok()?;
            count += 1;
        }

        Some(Self::new(parts[0], parts[1], parts[2], parts[3]))
    }
}

impl fmt::Display for PackageVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.major, self.minor, self.build, self.revision
        )
    }
}

/// Whether a registry version string carries a prerelease label.
pub fn is_prerelease_token(input: &str) -> bool {
    matches!(split_version(input).1, Some(label) if !label.is_empty())
}

/// Split `1.2.3-beta+meta` into `("1.2.3", Some("beta"))`.
fn split_version(input: &str) -> (&str, Option<&str>) {
    let trimmed = input.trim();
    let without_metadata = trimmed.split_once('+').map_or(trimmed, |(v, _)| v);
    match without_metadata.split_once('-') {
        Some((numeric, label)) => (numeric, Some(label)),
        None => (without_metadata, None),
    }
}
