//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → passed by value to each subsystem at construction
//!
//! On reload:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → server re-derives router, pools and certificates
//!     → atomic swap of each snapshot
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - No global config singleton

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use validation::{validate_config, ValidationError};
pub use watcher::ConfigWatcher;
pub use schema::{
    AppConfig, AuthConfig, CertificateConfig, DomainConfig, GatewayConfig, HeaderRules,
    HealthCheckConfig, ListenerConfig, ObservabilityConfig, RewritePath, SslConfig,
    TargetConfig, TargetEntry, TargetSpec, TimeoutConfig,
};
