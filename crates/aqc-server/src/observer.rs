//! ---
//! aqc_section: "05-ingestion-server"
//! aqc_subsection: "module"
//! aqc_type: "source"
//! aqc_scope: "code"
//! aqc_description: "Concurrent ingestion server for encrypted telemetry."
//! aqc_version: "v0.0.0-prealpha"
//! aqc_owner: "tbd"
//! ---
//! Monitoring hook invoked synchronously from connection workers.
//!
//! External consoles implement [`ServerObserver`]; the server behaves
//! identically with the no-op default, falling back to its own diagnostics.

use std::net::SocketAddr;

use aqc_proto::ParsedFrame;

/// Callbacks driven by the ingestion pipeline.
pub trait ServerObserver: Send + Sync {
    /// Free-form diagnostic line.
    fn on_log(&self, _message: &str) {}

    /// A connection was accepted.
    fn on_client_connected(&self, _addr: SocketAddr) {}

    /// A connection closed, for any reason.
    fn on_client_disconnected(&self, _addr: SocketAddr) {}

    /// A frame was decrypted, validated, and admitted.
    fn on_data_received(&self, _record: &ParsedFrame, _addr: SocketAddr) {}
}

/// Default observer: every callback is a no-op.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl ServerObserver for NoopObserver {}
