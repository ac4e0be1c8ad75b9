//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Config → Validate → Register WebSocket handlers → Load certificates
//!     → Build server → Bind listener
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Drain connections → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//!     SIGHUP → Reload the configuration file
//! ```
//!
//! # Design Decisions
//! - Ordered startup: handlers and certificates are final before the socket opens
//! - Shutdown is broadcast; every long-running task holds a receiver

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use signals::{wait_for_signal, ReloadTrigger};
pub use startup::{GatewayBuilder, StartupError};
