//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     Periodic timer (owner task)
//!     → Probe every target of every pooled domain
//!     → Update upstream failure streaks via the selector
//!     → Publish per-domain records (state.rs)
//!
//! Passive health checks (passive.rs):
//!     Proxied request completes or fails
//!     → Classify the outcome
//!     → mark_success / mark_failure on the upstream facade
//!
//! Gateway health (state.rs):
//!     GET <health path> → cached {status, timestamp}
//! ```
//!
//! # Design Decisions
//! - Active and passive checks are complementary
//! - One success restores an excluded target; excluded targets keep being
//!   probed so they can recover
//! - Records are published as immutable snapshots; request handling never
//!   waits on the monitor

pub mod active;
pub mod passive;
pub mod state;

pub use active::HealthMonitor;
pub use state::{GatewayHealth, HealthCache, HealthCheckRecord, HealthRecords};
