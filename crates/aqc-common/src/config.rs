//! ---
//! aqc_section: "01-core-runtime"
//! aqc_subsection: "module"
//! aqc_type: "source"
//! aqc_scope: "code"
//! aqc_description: "Shared configuration and logging primitives."
//! aqc_version: "v0.0.0-prealpha"
//! aqc_owner: "tbd"
//! ---
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::logging::LogFormat;

fn default_listen() -> SocketAddr {
    "127.0.0.1:12351"
        .parse()
        .expect("valid default listen address")
}

fn default_recv_timeout_secs() -> u64 {
    10
}

fn default_pid_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_private_key_path() -> PathBuf {
    PathBuf::from("private.pem")
}

fn default_public_key_path() -> PathBuf {
    PathBuf::from("public.pem")
}

fn default_readings_path() -> PathBuf {
    PathBuf::from("target/readings/readings.jsonl")
}

fn default_server_addr() -> String {
    "127.0.0.1:12351".to_owned()
}

fn default_sensor_id() -> u16 {
    1
}

fn default_send_interval_secs() -> u64 {
    10
}

fn default_bootstrap_timeout_secs() -> u64 {
    30
}

fn default_latitude() -> f64 {
    37.5
}

fn default_longitude() -> f64 {
    127.0
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

/// Primary configuration object shared by the daemon and the sensor node.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: Option<PathBuf>,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &'static str = "AQC_CONFIG";

    /// Load configuration from disk, respecting the `AQC_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    ///
    /// When neither the environment override nor any candidate file exists,
    /// built-in defaults are returned with `source == None`.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        debug!("no configuration file found; using built-in defaults");
        Ok(LoadedAppConfig {
            config: Self::default(),
            source: None,
        })
    }

    /// Parse a TOML configuration file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("unable to read configuration at {}", path.display()))?;
        let config: Self = toml::from_str(&raw)
            .with_context(|| format!("invalid configuration in {}", path.display()))?;
        Ok(config)
    }
}

/// Ingestion server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the ingestion listener binds to.
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    /// Idle receive timeout per connection, in seconds.
    #[serde(default = "default_recv_timeout_secs")]
    pub recv_timeout_secs: u64,
    /// Directory where the `server_<port>.pid` marker is written.
    #[serde(default = "default_pid_dir")]
    pub pid_dir: PathBuf,
    /// PEM path for the server's private key.
    #[serde(default = "default_private_key_path")]
    pub private_key_path: PathBuf,
    /// PEM path where the public key is published for clients.
    #[serde(default = "default_public_key_path")]
    pub public_key_path: PathBuf,
    /// Sensor IDs admitted by the standalone daemon's static registry.
    #[serde(default)]
    pub registered_sensors: Vec<u16>,
    /// JSON-lines file the standalone daemon appends readings to.
    #[serde(default = "default_readings_path")]
    pub readings_path: PathBuf,
}

impl ServerConfig {
    /// Idle receive timeout as a [`Duration`].
    pub fn recv_timeout(&self) -> Duration {
        Duration::from_secs(self.recv_timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            recv_timeout_secs: default_recv_timeout_secs(),
            pid_dir: default_pid_dir(),
            private_key_path: default_private_key_path(),
            public_key_path: default_public_key_path(),
            registered_sensors: Vec::new(),
            readings_path: default_readings_path(),
        }
    }
}

/// Sensor node settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Server address the node connects to.
    #[serde(default = "default_server_addr")]
    pub server_addr: String,
    /// Sensor ID stamped into every frame.
    #[serde(default = "default_sensor_id")]
    pub sensor_id: u16,
    /// Seconds between telemetry transmissions.
    #[serde(default = "default_send_interval_secs")]
    pub send_interval_secs: u64,
    /// PEM path used as the local public-key cache.
    #[serde(default = "default_public_key_path")]
    pub public_key_path: PathBuf,
    /// Timeout for the in-band public-key bootstrap, in seconds.
    #[serde(default = "default_bootstrap_timeout_secs")]
    pub bootstrap_timeout_secs: u64,
    /// Fixed latitude reported by this node.
    #[serde(default = "default_latitude")]
    pub latitude: f64,
    /// Fixed longitude reported by this node.
    #[serde(default = "default_longitude")]
    pub longitude: f64,
}

impl ClientConfig {
    /// Interval between transmissions as a [`Duration`].
    pub fn send_interval(&self) -> Duration {
        Duration::from_secs(self.send_interval_secs)
    }

    /// Bootstrap timeout as a [`Duration`].
    pub fn bootstrap_timeout(&self) -> Duration {
        Duration::from_secs(self.bootstrap_timeout_secs)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: default_server_addr(),
            sensor_id: default_sensor_id(),
            send_interval_secs: default_send_interval_secs(),
            public_key_path: default_public_key_path(),
            bootstrap_timeout_secs: default_bootstrap_timeout_secs(),
            latitude: default_latitude(),
            longitude: default_longitude(),
        }
    }
}

/// Logging sink configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Directory receiving the rolling daily log file.
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    /// Optional file prefix; defaults to the service name.
    #[serde(default)]
    pub file_prefix: Option<String>,
    /// Stdout log format.
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            file_prefix: None,
            format: LogFormat::default(),
        }
    }
}
