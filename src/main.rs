//! Edge Gateway
//!
//! Public entry point in front of a locally bound application server.
//!
//! # Architecture Overview
//!
//! ```text
//!                       ┌──────────────────────────────────────────────────────┐
//!                       │                     EDGE GATEWAY                      │
//!                       │                                                       │
//!   Client (HTTP/HTTPS) │  ┌─────────┐   ┌──────────┐   ┌───────────────────┐   │
//!   ────────────────────┼─▶│ net/tls │──▶│ security │──▶│ routing (domains) │   │
//!                       │  │  (SNI)  │   │  (auth)  │   └─────────┬─────────┘   │
//!                       │  └─────────┘   └──────────┘             │             │
//!                       │                        ┌────────────────┼──────────┐  │
//!                       │                        ▼                ▼          ▼  │
//!                       │                 ┌────────────┐  ┌────────────┐ ┌─────┐│
//!                       │                 │ websocket  │  │load_balancer│ │ app ││──▶ Local app
//!                       │                 │  handlers  │  │  + health   │ └─────┘│
//!                       │                 └────────────┘  └──────┬─────┘        │
//!                       │                                        ▼              │
//!                       │                                 ┌────────────┐        │
//!                       │                                 │ http/proxy │────────┼──▶ Upstreams
//!                       │                                 └────────────┘        │
//!                       └──────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::sync::mpsc;

use edge_gateway::config::{load_config, validate_config, ConfigWatcher, GatewayConfig};
use edge_gateway::lifecycle::{wait_for_signal, ReloadTrigger};
use edge_gateway::observability::{logging, metrics};
use edge_gateway::{GatewayBuilder, Shutdown};

#[derive(Parser)]
#[command(name = "edge-gateway")]
#[command(about = "TLS-terminating edge gateway with domain routing and load balancing", long_about = None)]
struct Cli {
    /// Configuration file (TOML). Defaults apply when it does not exist.
    #[arg(short, long, default_value = "gateway.toml")]
    config: PathBuf,

    /// Validate the configuration and exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config_exists = cli.config.exists();

    let config = if config_exists {
        load_config(&cli.config)?
    } else {
        GatewayConfig::default()
    };

    if cli.check {
        validate_config(&config).map_err(|errors| {
            for e in &errors {
                eprintln!("error: {e}");
            }
            format!("{} validation error(s)", errors.len())
        })?;
        println!("{}: configuration OK ({} domains)", cli.config.display(), config.domains.len());
        return Ok(());
    }

    logging::init_logging(&config.observability.log_level);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "edge-gateway starting");
    if !config_exists {
        tracing::warn!(path = %cli.config.display(), "Config file not found, using defaults");
    }

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    // The watcher handle must outlive the server for reloads to keep flowing.
    let (config_updates, reload, _watcher) = if config_exists {
        let (watcher, updates) = ConfigWatcher::new(&cli.config);
        let sender = watcher.sender();
        let handle = match watcher.run() {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::error!(error = %e, "Config watcher unavailable, file changes will need SIGHUP");
                None
            }
        };
        let reload = ReloadTrigger {
            path: cli.config.clone(),
            updates: sender,
        };
        (updates, Some(reload), handle)
    } else {
        let (_tx, updates) = mpsc::unbounded_channel();
        (updates, None, None)
    };

    let shutdown = Shutdown::new();
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_signal(&signal_shutdown, reload).await {
            tracing::error!(error = %e, "Signal handling failed, shutting down");
            signal_shutdown.trigger();
        }
    });

    GatewayBuilder::new(config)
        .run(config_updates, &shutdown)
        .await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
