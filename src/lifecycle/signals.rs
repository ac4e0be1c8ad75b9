//! OS signal handling.
//!
//! # Responsibilities
//! - Wait for SIGINT (Ctrl+C) or SIGTERM and trigger graceful shutdown
//! - Reload the configuration file on SIGHUP
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - A reload that fails to load keeps the current configuration

use std::io;
use std::path::PathBuf;

use tokio::sync::mpsc;

use crate::config::{load_config, GatewayConfig};
use crate::lifecycle::Shutdown;

/// Where SIGHUP reloads come from and where they go.
#[derive(Debug, Clone)]
pub struct ReloadTrigger {
    pub path: PathBuf,
    pub updates: mpsc::UnboundedSender<GatewayConfig>,
}

impl ReloadTrigger {
    fn reload(&self) {
        tracing::info!(path = %self.path.display(), "Reloading configuration");
        match load_config(&self.path) {
            Ok(config) => {
                let _ = self.updates.send(config);
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to reload config, keeping current configuration");
            }
        }
    }
}

/// Block until a termination signal arrives, then trigger `shutdown`.
pub async fn wait_for_signal(shutdown: &Shutdown, reload: Option<ReloadTrigger>) -> io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sighup = signal(SignalKind::hangup())?;

        loop {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    result?;
                    tracing::info!("Received SIGINT (Ctrl+C), shutting down");
                    break;
                }
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM, shutting down");
                    break;
                }
                _ = sighup.recv() => match &reload {
                    Some(trigger) => trigger.reload(),
                    None => tracing::info!("Received SIGHUP without a config file, ignoring"),
                },
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = &reload;
        tokio::signal::ctrl_c().await?;
        tracing::info!("Received Ctrl+C, shutting down");
    }

    shutdown.trigger();
    Ok(())
}
