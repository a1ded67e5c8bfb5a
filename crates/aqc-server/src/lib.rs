//! ---
//! aqc_section: "05-ingestion-server"
//! aqc_subsection: "module"
//! aqc_type: "source"
//! aqc_scope: "code"
//! aqc_description: "Concurrent ingestion server for encrypted telemetry."
//! aqc_version: "v0.0.0-prealpha"
//! aqc_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! TCP ingestion server for encrypted AquaCon telemetry.
//!
//! One task owns the accept loop; every accepted connection gets its own
//! worker task, so no global lock serializes message handling across
//! connections. Shutdown is cooperative: a broadcast signal flips every loop
//! and the listener is dropped to unblock the accept call, while in-flight
//! workers finish their current message and exit on their own.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

use aqc_common::config::ServerConfig;
use aqc_security::KeyStore;
use aqc_store::{ReadingStore, SensorRegistry};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

mod connection;
pub mod instance;
pub mod observer;

use connection::{handle_connection, ConnectionContext};
use instance::InstanceGuard;
use observer::{NoopObserver, ServerObserver};

/// Shared result type for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;

/// Errors raised while standing the server up. All are fatal at startup;
/// no partial-start state is exposed.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The target port is already held by another process.
    #[error("port {0} unavailable: {1}")]
    PortUnavailable(u16, #[source] std::io::Error),
    /// The listener failed to bind.
    #[error("bind failed on {0}: {1}")]
    Bind(SocketAddr, #[source] std::io::Error),
    /// Filesystem or socket IO failure during startup.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Key material could not be initialized.
    #[error(transparent)]
    Security(#[from] aqc_security::SecurityError),
}

/// Ingestion server, configured but not yet listening.
pub struct IngestServer {
    config: ServerConfig,
    keys: Arc<KeyStore>,
    registry: Arc<dyn SensorRegistry>,
    store: Arc<dyn ReadingStore>,
    observer: Arc<dyn ServerObserver>,
}

impl IngestServer {
    /// Assemble a server from its collaborators, with the no-op observer.
    pub fn new(
        config: ServerConfig,
        keys: Arc<KeyStore>,
        registry: Arc<dyn SensorRegistry>,
        store: Arc<dyn ReadingStore>,
    ) -> Self {
        Self {
            config,
            keys,
            registry,
            store,
            observer: Arc::new(NoopObserver),
        }
    }

    /// Attach a monitoring observer.
    pub fn with_observer(mut self, observer: Arc<dyn ServerObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Enforce single-instance operation, bind, and start accepting.
    pub async fn start(self) -> Result<ServerHandle> {
        let guard = InstanceGuard::acquire(self.config.listen, &self.config.pid_dir)?;
        let listener = TcpListener::bind(self.config.listen)
            .await
            .map_err(|err| ServerError::Bind(self.config.listen, err))?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "ingestion server listening");

        let (shutdown_tx, mut accept_shutdown) = broadcast::channel::<()>(16);
        let clients = Arc::new(Mutex::new(HashSet::new()));
        let ctx = Arc::new(ConnectionContext {
            keys: self.keys,
            registry: self.registry,
            store: self.store,
            observer: self.observer,
            recv_timeout: self.config.recv_timeout(),
            clients: clients.clone(),
        });

        let worker_shutdown = shutdown_tx.clone();
        let accept_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = accept_shutdown.recv() => {
                        debug!("accept loop observed shutdown");
                        break;
                    }
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((stream, peer)) => {
                                tokio::spawn(handle_connection(
                                    stream,
                                    peer,
                                    ctx.clone(),
                                    worker_shutdown.subscribe(),
                                ));
                            }
                            Err(err) => {
                                error!(error = %err, "accept failed");
                            }
                        }
                    }
                }
            }
            // Listener drops here, releasing the port before the pid marker
            // is removed by the handle.
        });

        Ok(ServerHandle {
            shutdown: shutdown_tx,
            accept_task,
            local_addr,
            clients,
            guard,
        })
    }
}

/// Lifecycle handle for a running server.
pub struct ServerHandle {
    shutdown: broadcast::Sender<()>,
    accept_task: JoinHandle<()>,
    local_addr: SocketAddr,
    clients: Arc<Mutex<HashSet<SocketAddr>>>,
    guard: InstanceGuard,
}

impl ServerHandle {
    /// Address the listener actually bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Snapshot of currently connected peers.
    pub fn connected_clients(&self) -> Vec<SocketAddr> {
        self.clients.lock().iter().copied().collect()
    }

    /// Signal shutdown, wait for the accept loop, and remove the pid marker.
    ///
    /// Connection workers observe the same signal between receives and exit
    /// on their own; their sockets are not forcibly severed.
    pub async fn shutdown(mut self) -> Result<()> {
        let _ = self.shutdown.send(());
        if let Err(err) = (&mut self.accept_task).await {
            error!(error = %err, "accept task join failed");
        }
        self.guard.release();
        info!("ingestion server shutdown complete");
        Ok(())
    }
}
