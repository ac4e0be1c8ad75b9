//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Enforce at most one exact entry per hostname
//! - Enforce at most one entry per wildcard pattern
//! - Reject malformed wildcard patterns
//! - Validate value ranges (intervals > 0, thresholds > 0)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Per-domain target and certificate problems are not errors here; they
//!   disable that domain's capability when the runtime is built
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Upstream pools and forwarders are keyed by the entry name, so a
//!   repeated wildcard is rejected just like a repeated hostname; distinct
//!   overlapping wildcards are fine

use std::collections::HashSet;

use thiserror::Error;

use crate::config::schema::GatewayConfig;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("domain entry #{0} has an empty name")]
    EmptyDomain(usize),
    #[error("domain '{0}' is configured more than once")]
    DuplicateDomain(String),
    #[error("wildcard '{0}' is configured more than once")]
    DuplicateWildcard(String),
    #[error("domain '{0}' is not a valid wildcard (expected '*.base')")]
    MalformedWildcard(String),
    #[error("domain '{0}': rewrite_path.from must start with '/'")]
    RewriteFrom(String),
    #[error("health_check.{0} must be greater than zero")]
    ZeroHealthSetting(&'static str),
}

pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();

    for (index, domain) in config.domains.iter().enumerate() {
        let name = domain.domain.trim().to_ascii_lowercase();
        if name.is_empty() {
            errors.push(ValidationError::EmptyDomain(index));
            continue;
        }

        let wildcard = name.contains('*');
        if wildcard {
            let valid = name
                .strip_prefix("*.")
                .is_some_and(|base| !base.is_empty() && !base.contains('*'));
            if !valid {
                errors.push(ValidationError::MalformedWildcard(domain.domain.clone()));
            }
        }

        if !seen.insert(name) {
            errors.push(if wildcard {
                ValidationError::DuplicateWildcard(domain.domain.clone())
            } else {
                ValidationError::DuplicateDomain(domain.domain.clone())
            });
        }

        if let Some(rewrite) = &domain.rewrite_path {
            if !rewrite.from.starts_with('/') {
                errors.push(ValidationError::RewriteFrom(domain.domain.clone()));
            }
        }
    }

    if config.health_check.max_failures == 0 {
        errors.push(ValidationError::ZeroHealthSetting("max_failures"));
    }
    if config.health_check.interval_secs == 0 {
        errors.push(ValidationError::ZeroHealthSetting("interval_secs"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
