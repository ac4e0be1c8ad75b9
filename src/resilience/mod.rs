//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to an upstream (proxied request or health probe):
//!     → timeouts.rs (bound the call by an explicit deadline)
//!     → Success, upstream error, or timeout returned to the caller
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - No retries: a failed request is reported to the client and counted
//!   against the upstream's health

pub mod timeouts;

pub use timeouts::{upstream_timeout, with_timeout, CallError};
