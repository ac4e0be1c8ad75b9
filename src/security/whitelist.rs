//! Path whitelist.
//!
//! # Design Decisions
//! - Rules are typed when the whitelist is built, never re-parsed per request
//! - Evaluated in declared order, first match wins (not longest prefix)
//! - No implicit substring matching: `/media/*` does not cover `/mediaX`

use std::fmt;

/// A single whitelist entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WhitelistRule {
    /// Path equals the pattern.
    Exact(String),
    /// Pattern ended in `*`: literal prefix without the star.
    Prefix(String),
    /// Pattern ended in `/`: anything inside the directory.
    Dir(String),
}

impl WhitelistRule {
    pub fn parse(pattern: &str) -> Self {
        let pattern = pattern.trim();
        if let Some(prefix) = pattern.strip_suffix('*') {
            WhitelistRule::Prefix(prefix.to_string())
        } else if pattern.ends_with('/') {
            WhitelistRule::Dir(pattern.to_string())
        } else {
            WhitelistRule::Exact(pattern.to_string())
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        match self {
            WhitelistRule::Exact(exact) => path == exact,
            WhitelistRule::Prefix(prefix) => path.starts_with(prefix.as_str()),
            // The directory itself, with or without its trailing slash.
            WhitelistRule::Dir(dir) => {
                path.starts_with(dir.as_str()) || path == dir.trim_end_matches('/')
            }
        }
    }
}

impl fmt::Display for WhitelistRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WhitelistRule::Exact(p) => write!(f, "{p}"),
            WhitelistRule::Prefix(p) => write!(f, "{p}*"),
            WhitelistRule::Dir(p) => write!(f, "{p}"),
        }
    }
}

/// Ordered list of whitelist rules.
#[derive(Debug, Clone, Default)]
pub struct Whitelist {
    rules: Vec<WhitelistRule>,
}

impl Whitelist {
    pub fn from_patterns<S: AsRef<str>>(patterns: &[S]) -> Self {
        let rules = patterns
            .iter()
            .map(AsRef::as_ref)
            .filter(|p| !p.trim().is_empty())
            .map(WhitelistRule::parse)
            .collect();
        Self { rules }
    }

    /// The first rule covering `path`.
    pub fn find(&self, path: &str) -> Option<&WhitelistRule> {
        self.rules.iter().find(|rule| rule.matches(path))
    }

    pub fn allows(&self, path: &str) -> bool {
        self.find(path).is_some()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
