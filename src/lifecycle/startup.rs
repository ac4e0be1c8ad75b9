//! Startup orchestration.
//!
//! # Responsibilities
//! - Validate configuration
//! - Collect WebSocket handlers before anything listens
//! - Load SNI certificates
//! - Bind the listener and begin accepting traffic
//!
//! # Design Decisions
//! - Fail fast on invalid configuration
//! - Certificate problems only disable TLS for the affected domain
//! - Listeners start last (traffic only when ready)

use std::future::Future;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use crate::config::{validate_config, ConfigError, GatewayConfig};
use crate::http::{HttpServer, WsConnection, WsRegistryBuilder};
use crate::lifecycle::Shutdown;
use crate::net::load_certificates;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        source: std::io::Error,
    },
    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),
}

/// Assembles a gateway in startup order.
pub struct GatewayBuilder {
    config: GatewayConfig,
    ws_routes: WsRegistryBuilder,
}

impl GatewayBuilder {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            ws_routes: WsRegistryBuilder::new(),
        }
    }

    /// Register a local WebSocket handler under `path_key`.
    pub fn register_ws_handler<F, Fut>(mut self, path_key: impl Into<String>, handler: F) -> Self
    where
        F: Fn(WsConnection) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.ws_routes.register(path_key, handler);
        self
    }

    /// Validate, freeze the handler table and load certificates.
    pub fn build(self) -> Result<HttpServer, StartupError> {
        validate_config(&self.config).map_err(ConfigError::Validation)?;

        let ws_routes = self.ws_routes.build();
        let certs = load_certificates(&self.config.domains);
        tracing::info!(
            domains = self.config.domains.len(),
            ws_routes = ws_routes.len(),
            certificates = certs.len(),
            "Gateway assembled"
        );

        Ok(HttpServer::new(self.config, ws_routes, certs))
    }

    /// Build, bind the HTTP listener and serve until `shutdown` fires.
    pub async fn run(
        self,
        config_updates: mpsc::UnboundedReceiver<GatewayConfig>,
        shutdown: &Shutdown,
    ) -> Result<(), StartupError> {
        let address = self.config.listener.http_address.clone();
        let server = self.build()?;
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|source| StartupError::Bind { address, source })?;

        server.run(listener, config_updates, shutdown).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DomainConfig;

    #[test]
    fn invalid_config_fails_fast() {
        let mut config = GatewayConfig::default();
        config.domains.push(DomainConfig {
            domain: "*.*.example.com".into(),
            ..Default::default()
        });
        let err = GatewayBuilder::new(config).build().err().unwrap();
        assert!(matches!(err, StartupError::Config(ConfigError::Validation(_))));
    }

    #[test]
    fn registered_handlers_reach_the_server() {
        let server = GatewayBuilder::new(GatewayConfig::default())
            .register_ws_handler("/events", |_conn| async {})
            .register_ws_handler("device", |_conn| async {})
            .build()
            .unwrap();
        assert_eq!(server.state().ws_routes.len(), 2);
    }
}
