//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (Axum setup, request ID, auth middleware)
//!     → request.rs (host, upgrade detection, listener scheme)
//!     → routing layer resolves the domain
//!     → proxy.rs (pick upstream or local app, rewrite, forward)
//!       or websocket.rs (local upgrade handlers)
//!     → response.rs (JSON errors, bare upgrade rejections)
//!     → Send to client
//! ```

pub mod proxy;
pub mod request;
pub mod response;
pub mod server;
pub mod websocket;

pub use request::{ListenerScheme, MakeRequestUuid, X_REQUEST_ID};
pub use response::ProxyError;
pub use server::{AppState, GatewaySnapshot, HttpServer};
pub use websocket::{WsConnection, WsRegistry, WsRegistryBuilder};
