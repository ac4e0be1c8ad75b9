//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → access_control.rs (ordered allow rules, API key gate)
//!         → whitelist.rs (typed path rules, first match)
//!         → api_key.rs (extract key, length check, constant-time compare)
//!     → Pass to routing
//!
//! Forwarded request:
//!     → headers.rs (client IP, X-Forwarded-*, hop-by-hop, custom headers)
//! ```
//!
//! # Design Decisions
//! - Each request is judged once from its own headers (and body, for keys)
//! - No server-side session state beyond the rotating key and the UI cookie
//! - Only `/api/` paths and upgrades are hard-gated on the key

pub mod access_control;
pub mod api_key;
pub mod headers;
pub mod whitelist;

pub use access_control::{auth_middleware, AuthPolicy};
pub use api_key::ApiKeyStore;
pub use whitelist::{Whitelist, WhitelistRule};
