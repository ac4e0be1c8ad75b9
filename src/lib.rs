//! Edge gateway library: TLS/SNI termination, domain routing, upstream load
//! balancing with health checks, WebSocket upgrade routing and an API key gate.

pub mod admin;
pub mod config;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod load_balancer;
pub mod net;
pub mod observability;
pub mod resilience;
pub mod routing;
pub mod security;

pub use config::GatewayConfig;
pub use http::{HttpServer, WsConnection, WsRegistryBuilder};
pub use lifecycle::{GatewayBuilder, Shutdown};
