use std::fmt;

use regex::{Regex, RegexBuilder};

use crate::config::MatchMode;

/// Compiled package id matcher.
#[derive(Clone)]
pub struct PackageIdPattern {
    pattern: String,
    mode: MatchMode,
    regex: Regex,
}

impl PackageIdPattern {
    pub fn new(pattern: &str, mode: MatchMode, ignore_case: bool) -> Result<Self, regex::Error> {
        let source = match mode {
            MatchMode::Exact => format!("^{}$", regex::escape(pattern)),
            MatchMode::Prefix => format!("^{}", regex::escape(pattern)),
            MatchMode::Suffix => format!("{}$", regex::escape(pattern)),
            MatchMode::Contains => regex::escape(pattern),
            MatchMode::Wildcard => wildcard_to_regex(pattern),
            MatchMode::Regex => format!("^(?:{pattern})$"),
        };

        let regex = RegexBuilder::new(&source)
            .case_insensitive(ignore_case)
            .build()?;

        Ok(Self {
            pattern: pattern.to_string(),
            mode,
            regex,
        })
    }

    pub fn is_match(&self, package_id: &str) -> bool {
        self.regex.is_match(package_id)
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn mode(&self) -> MatchMode {
        self.mode
    }
}

impl fmt::Debug for PackageIdPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PackageIdPattern")
            .field("pattern", &self.pattern)
            .field("mode", &self.mode)
            .finish()
    }
}

/// `*` matches any run of characters, `?` exactly one.
fn wildcard_to_regex(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 8);
    out.push('^');
    let mut buf = [0u8; 4];
    for c in pattern.chars() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            c => out.push_str(&regex::escape(c.encode_utf8(&mut buf))),
        }
    }
    out.push('$');
    out
}
