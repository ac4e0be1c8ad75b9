//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection on the HTTPS listener
//!     → tls.rs (handshake, SNI → certificate lookup)
//!     → Hand off to HTTP layer
//! ```
//!
//! # Design Decisions
//! - TLS is optional and handled transparently
//! - Certificates are loaded before the listener opens
//! - SNI lookup is synchronous and allocation-light

pub mod tls;

pub use tls::{load_certificates, CertStore, SniResolver, TlsError};
