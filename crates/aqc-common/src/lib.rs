//! ---
//! aqc_section: "01-core-runtime"
//! aqc_subsection: "module"
//! aqc_type: "source"
//! aqc_scope: "code"
//! aqc_description: "Shared configuration and logging primitives."
//! aqc_version: "v0.0.0-prealpha"
//! aqc_owner: "tbd"
//! ---
//! Shared primitives for the AquaCon workspace: configuration loading and
//! tracing initialization consumed by every binary.

pub mod config;
pub mod logging;

pub use config::{AppConfig, ClientConfig, LoadedAppConfig, LoggingConfig, ServerConfig};
pub use logging::{init_tracing, LogFormat};
