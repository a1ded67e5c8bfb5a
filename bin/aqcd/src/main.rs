//! ---
//! aqc_section: "07-daemon"
//! aqc_subsection: "binary"
//! aqc_type: "source"
//! aqc_scope: "code"
//! aqc_description: "Binary entrypoint for the AquaCon ingestion daemon."
//! aqc_version: "v0.0.0-prealpha"
//! aqc_owner: "tbd"
//! ---
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use aqc_common::config::AppConfig;
use aqc_common::logging::init_tracing;
use aqc_security::KeyStore;
use aqc_server::IngestServer;
use aqc_store::{JsonlStore, StaticRegistry};
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "AquaCon telemetry ingestion daemon",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(long, help = "Override the listen address from configuration")]
    listen: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/aquacon.toml"));
    candidates.push(PathBuf::from("configs/aquacon.dev.toml"));

    let loaded = AppConfig::load_with_source(&candidates)?;
    let mut config = loaded.config;
    if let Some(listen) = cli.listen {
        config.server.listen = listen;
    }
    init_tracing("aqcd", &config.logging)?;

    match &loaded.source {
        Some(path) => info!(path = %path.display(), "configuration loaded"),
        None => info!("no configuration file found; using built-in defaults"),
    }
    if config.server.registered_sensors.is_empty() {
        warn!("no registered sensors configured; every session will be refused");
    }

    let keys = Arc::new(KeyStore::load_or_generate(
        &config.server.private_key_path,
        &config.server.public_key_path,
    )?);
    let registry = Arc::new(StaticRegistry::new(
        config.server.registered_sensors.iter().copied(),
    ));
    let store = Arc::new(JsonlStore::open(&config.server.readings_path)?);
    info!(readings = %config.server.readings_path.display(), "reading store ready");

    let server = IngestServer::new(config.server.clone(), keys, registry, store);
    let handle = server.start().await?;

    info!(address = %handle.local_addr(), "daemon running; waiting for termination signal");
    signal::ctrl_c().await?;
    info!("ctrl-c received; shutting down");
    handle.shutdown().await?;

    Ok(())
}
