//! Keep rules: remote keys that sync must never delete.

use regex::Regex;
use std::fmt;

use bucketsync_common::{Error, Result};

/// Prefix selecting a regex in [`KeepRule::parse`].
pub const PATTERN_PREFIX: &str = "re:";

/// Exempts matching remote keys from deletion.
#[derive(Debug, Clone)]
pub enum KeepRule {
    /// Matches one key exactly.
    Exact(String),
    /// Matches keys the regex finds a match in (unanchored).
    Pattern(Regex),
}

impl KeepRule {
    /// Keep exactly `key`.
    pub fn exact(key: impl Into<String>) -> Self {
        KeepRule::Exact(key.into())
    }

    /// Keep keys matching `pattern`.
    ///
    /// # Errors
    /// - Configuration error if `pattern` does not compile
    pub fn pattern(pattern: &str) -> Result<Self> {
        Regex::new(pattern)
            .map(KeepRule::Pattern)
            .map_err(|e| Error::Config(format!("Invalid keep pattern '{}': {}", pattern, e)))
    }

    /// Parse `re:<regex>` as a pattern and anything else as an exact key.
    pub fn parse(rule: &str) -> Result<Self> {
        match rule.strip_prefix(PATTERN_PREFIX) {
            Some(pattern) => Self::pattern(pattern),
            None if rule.is_empty() => Err(Error::Config("Empty keep rule".to_string())),
            None => Ok(Self::exact(rule)),
        }
    }

    /// Whether `key` is kept by this rule.
    pub fn matches(&self, key: &str) -> bool {
        match self {
            KeepRule::Exact(exact) => exact == key,
            KeepRule::Pattern(re) => re.is_match(key),
        }
    }
}

impl fmt::Display for KeepRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeepRule::Exact(exact) => f.write_str(exact),
            KeepRule::Pattern(re) => write!(f, "{}{}", PATTERN_PREFIX, re.as_str()),
        }
    }
}

/// Whether any rule keeps `key`.
pub fn is_kept(rules: &[KeepRule], key: &str) -> bool {
    rules.iter().any(|rule| rule.matches(key))
}
