//! conduit-proxy
//!
//! Two listeners share one process:
//!
//! ```text
//!                    ┌───────────────────────────────────────────────────┐
//!   HTTP client ────▶│ http listener                                     │
//!                    │   access gate → rate limiter → stream forwarder ──┼──▶ upstream
//!                    │         └──── error responder (JSON) ◀────┘       │
//!                    │                                                   │
//!   raw client ─────▶│ tunnel listener                                   │
//!                    │   preamble → CONNECT: 200 OK + relay ─────────────┼──▶ upstream
//!                    │            → Host:    replay preamble + relay ────┼──▶ upstream
//!                    └───────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use conduit_proxy::config::{self, DeploymentMode, ProxyConfig};
use conduit_proxy::lifecycle::{signals, Shutdown};
use conduit_proxy::net::Listener;
use conduit_proxy::observability::logging;
use conduit_proxy::tunnel::{TunnelServer, TunnelSettings};
use conduit_proxy::{store, HttpServer};

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "PROXY_CONFIG")]
    config: Option<PathBuf>,

    /// Deployment mode (production or development)
    #[arg(long, env = "PROXY_MODE")]
    mode: Option<DeploymentMode>,

    /// Override the HTTP listener address
    #[arg(long)]
    http_addr: Option<String>,

    /// Override the tunnel listener address
    #[arg(long)]
    tunnel_addr: Option<String>,
}

impl Cli {
    fn load(&self) -> Result<ProxyConfig, config::ConfigError> {
        let mut config = match &self.config {
            Some(path) => config::load_config(path)?,
            None => ProxyConfig::default(),
        };

        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        if let Some(addr) = &self.http_addr {
            config.listener.bind_address = addr.clone();
        }
        if let Some(addr) = &self.tunnel_addr {
            config.tunnel.bind_address = addr.clone();
        }

        config::validation::validate_config(&config).map_err(config::ConfigError::Validation)?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = cli.load()?;

    logging::init_logging(config.mode, &config.observability.log_level)?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        mode = ?config.mode,
        "conduit-proxy starting"
    );

    let store = store::connect(&config.rate_limit.store).await?;

    let shutdown = Shutdown::new();
    tokio::spawn(signals::wait_for_signal(shutdown.clone()));

    let http_listener = TcpListener::bind(&config.listener.bind_address).await?;
    let http = HttpServer::new(config.clone(), Arc::clone(&store));
    let http_task = tokio::spawn(http.run(http_listener, shutdown.subscribe()));

    let tunnel_task = if config.tunnel.enabled {
        let listener = Listener::bind(&config.tunnel.bind_address, config.tunnel.max_connections).await?;
        let tunnel = TunnelServer::new(TunnelSettings::from_config(&config));
        Some(tokio::spawn(tunnel.run(listener, shutdown.subscribe())))
    } else {
        tracing::info!("Tunnel listener disabled");
        None
    };

    http_task.await??;
    if let Some(task) = tunnel_task {
        task.await??;
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
