//! Host matching logic.
//!
//! # Responsibilities
//! - Normalize Host header / SNI values (lowercase, no port, no trailing dot)
//! - Match exact hostnames
//! - Match `*.base` wildcards against `base` itself and any name under it
//!
//! # Design Decisions
//! - Host matching is case-insensitive (RFC 9110)
//! - No regex to guarantee O(n) matching
//! - The same wildcard rule is shared by the domain router and the SNI resolver

/// Normalize a Host header or SNI server name.
///
/// Strips the port (including bracketed IPv6 forms), a trailing dot and
/// lowercases the result.
pub fn normalize_host(raw: &str) -> String {
    let raw = raw.trim();
    let host = if let Some(rest) = raw.strip_prefix('[') {
        // [::1]:8080
        rest.split(']').next().unwrap_or(rest)
    } else if raw.matches(':').count() == 1 {
        raw.split(':').next().unwrap_or(raw)
    } else {
        raw
    };
    host.trim_end_matches('.').to_ascii_lowercase()
}

/// Return the base of a `*.base` pattern, or `None` for exact names.
pub fn wildcard_base(pattern: &str) -> Option<&str> {
    pattern.strip_prefix("*.").filter(|base| !base.is_empty())
}

/// True when `host` is `base` itself or ends with `.` + `base`.
///
/// Both arguments are expected to be normalized already.
pub fn matches_wildcard(host: &str, base: &str) -> bool {
    if host == base {
        return true;
    }
    host.len() > base.len() + 1
        && host.ends_with(base)
        && host.as_bytes()[host.len() - base.len() - 1] == b'.'
}

/// The part of `host` in front of `.base`; empty when `host == base`.
pub fn subdomain_of<'a>(host: &'a str, base: &str) -> &'a str {
    if host.len() > base.len() {
        &host[..host.len() - base.len() - 1]
    } else {
        ""
    }
}

/// A compiled domain pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainPattern {
    Exact(String),
    Wildcard { base: String },
}

impl DomainPattern {
    /// Compile a configured domain string.
    pub fn parse(domain: &str) -> Self {
        let domain = domain.trim().to_ascii_lowercase();
        match wildcard_base(&domain) {
            Some(base) => DomainPattern::Wildcard {
                base: base.to_string(),
            },
            None => DomainPattern::Exact(domain),
        }
    }

    /// Returns true if the normalized host matches this pattern.
    pub fn matches(&self, host: &str) -> bool {
        match self {
            DomainPattern::Exact(name) => name == host,
            DomainPattern::Wildcard { base } => matches_wildcard(host, base),
        }
    }
}
