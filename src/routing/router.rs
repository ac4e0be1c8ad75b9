//! Domain lookup and dispatch.
//!
//! # Responsibilities
//! - Store compiled domain entries
//! - Resolve a Host/SNI name to its domain configuration
//! - Substitute the captured subdomain into wildcard rewrite targets
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - O(1) exact lookup via HashMap, always ahead of wildcards
//! - O(n) wildcard scan in registration order; first covering wildcard wins,
//!   not the most specific one
//! - Explicit not-found rather than silent default

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::DomainConfig;
use crate::routing::matcher::{normalize_host, subdomain_of, DomainPattern};

/// Placeholder replaced by the captured subdomain in `rewrite_path.to`.
pub const SUBDOMAIN_PLACEHOLDER: &str = "{subdomain}";

/// A domain entry matched for a request.
#[derive(Debug, Clone)]
pub struct ResolvedDomain {
    /// The configured domain string (wildcards verbatim). Used as the
    /// upstream pool key.
    pub key: String,
    /// Effective configuration for this request.
    pub config: Arc<DomainConfig>,
}

/// Immutable host → domain table.
#[derive(Debug, Default)]
pub struct DomainRouter {
    entries: Vec<(DomainPattern, Arc<DomainConfig>)>,
    exact: HashMap<String, usize>,
}

impl DomainRouter {
    /// Compile the ordered domain list.
    pub fn from_config(domains: &[DomainConfig]) -> Self {
        let mut entries = Vec::with_capacity(domains.len());
        let mut exact = HashMap::new();

        for domain in domains {
            let pattern = DomainPattern::parse(&domain.domain);
            if let DomainPattern::Exact(name) = &pattern {
                if exact.contains_key(name) {
                    tracing::warn!(domain = %domain.domain, "Duplicate exact domain ignored");
                    continue;
                }
                exact.insert(name.clone(), entries.len());
            }
            entries.push((pattern, Arc::new(domain.clone())));
        }

        Self { entries, exact }
    }

    /// Resolve a raw Host header or SNI name.
    pub fn resolve(&self, hostname: &str) -> Option<ResolvedDomain> {
        let host = normalize_host(hostname);

        if let Some(&index) = self.exact.get(&host) {
            let config = Arc::clone(&self.entries[index].1);
            return Some(ResolvedDomain {
                key: config.domain.clone(),
                config,
            });
        }

        self.entries.iter().find_map(|(pattern, config)| match pattern {
            DomainPattern::Wildcard { base } if pattern.matches(&host) => {
                let subdomain = subdomain_of(&host, base);
                Some(ResolvedDomain {
                    key: config.domain.clone(),
                    config: Arc::new(with_subdomain(config, subdomain)),
                })
            }
            _ => None,
        })
    }

    /// Number of configured entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over configured entries in registration order.
    pub fn domains(&self) -> impl Iterator<Item = &DomainConfig> {
        self.entries.iter().map(|(_, config)| config.as_ref())
    }
}

fn with_subdomain(config: &DomainConfig, subdomain: &str) -> DomainConfig {
    let mut resolved = config.clone();
    if let Some(rewrite) = resolved.rewrite_path.as_mut() {
        rewrite.to = rewrite.to.replace(SUBDOMAIN_PLACEHOLDER, subdomain);
    }
    resolved.subdomain = Some(subdomain.to_string());
    resolved
}
