//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (Host header) or TLS ClientHello (SNI)
//!     → router.rs (domain lookup)
//!     → matcher.rs (normalize, exact / wildcard match)
//!     → Return: ResolvedDomain or not found (404)
//!
//! Domain Compilation (at startup and on reload):
//!     DomainConfig[]
//!     → Compile patterns, index exact names
//!     → Freeze as immutable DomainRouter
//! ```
//!
//! # Design Decisions
//! - Domains compiled at startup, immutable at runtime
//! - Exact entries always win over wildcards
//! - Wildcards: first registered match wins

pub mod matcher;
pub mod router;

pub use router::{DomainRouter, ResolvedDomain};
