//! Ticket engine daemon
//!
//! Wires the default registry, session manager and sweeper together and
//! keeps sweeping until interrupted.
//!
//! Usage:
//!   ticket-engine [--config <path>] [--log-level <level>]

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use horizon_ticket_engine::{
    telemetry, Clock, DefaultTicketRegistry, SsoSessionManager, SystemClock, TicketEngineConfig,
    TicketFactory, TicketRegistry, TicketSweeper,
};

#[derive(Debug, Parser)]
#[command(name = "ticket-engine", version, about = "SSO ticket lifecycle engine")]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured log level
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => TicketEngineConfig::load_from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => TicketEngineConfig::default(),
    };
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }

    telemetry::init_tracing(&config.log_level)?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let registry: Arc<dyn TicketRegistry> = Arc::new(DefaultTicketRegistry::new(clock.clone()));
    let factory = TicketFactory::new(&config, clock.clone())?;
    let manager = SsoSessionManager::new(registry.clone(), factory);

    info!(
        max_proxy_depth = config.max_proxy_depth,
        node_suffix = config.node_suffix.as_deref().unwrap_or(""),
        consistency = ?registry.consistency(),
        "Ticket engine ready"
    );

    let sweeper_handle = if config.sweeper.enabled {
        let sweeper = TicketSweeper::new(registry.clone(), clock, config.sweeper.clone());
        Some(sweeper.start())
    } else {
        info!("Ticket sweeper disabled");
        None
    };

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("Shutdown requested");

    if let Some(handle) = sweeper_handle {
        handle.stop().await;
    }

    let remaining = manager.registry().ticket_count().await?;
    info!(remaining, "Ticket engine stopped");
    Ok(())
}
