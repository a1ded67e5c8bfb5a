//! ---
//! aqc_section: "08-sensor-node"
//! aqc_subsection: "binary"
//! aqc_type: "source"
//! aqc_scope: "code"
//! aqc_description: "Binary entrypoint for the AquaCon sensor node."
//! aqc_version: "v0.0.0-prealpha"
//! aqc_owner: "tbd"
//! ---
use std::path::PathBuf;

use anyhow::Result;
use aqc_client::{obtain_public_key, SensorClient};
use aqc_common::config::AppConfig;
use aqc_common::logging::init_tracing;
use clap::Parser;
use tokio::signal;
use tracing::info;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "AquaCon sensor node",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(long, help = "Override the server address from configuration")]
    server: Option<String>,

    #[arg(long, help = "Override the sensor ID from configuration")]
    sensor_id: Option<u16>,
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
    if let Some(server) = cli.server {
        config.client.server_addr = server;
    }
    if let Some(sensor_id) = cli.sensor_id {
        config.client.sensor_id = sensor_id;
    }
    init_tracing("aqc-node", &config.logging)?;

    let public_key = obtain_public_key(&config.client).await?;
    let client = SensorClient::new(config.client, public_key);

    tokio::select! {
        result = client.run() => result?,
        _ = signal::ctrl_c() => {
            info!("ctrl-c received; stopping sensor node");
        }
    }

    Ok(())
}
