//! ---
//! aqc_section: "05-ingestion-server"
//! aqc_subsection: "module"
//! aqc_type: "source"
//! aqc_scope: "code"
//! aqc_description: "Concurrent ingestion server for encrypted telemetry."
//! aqc_version: "v0.0.0-prealpha"
//! aqc_owner: "tbd"
//! ---
//! Per-connection worker.
//!
//! Each accepted socket is owned by exactly one task, so messages within a
//! connection are processed strictly in arrival order. Incoming bytes are
//! classified by length and content: the 18-byte bootstrap literal gets a
//! length-prefixed PEM reply; anything else is accumulated until one full
//! OAEP ciphertext (the key size, 256 bytes for RSA-2048) is available, then
//! decrypted, decoded, admission-checked, and persisted. A bad message drops;
//! a failed admission check closes the session.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use aqc_proto::{ParsedFrame, PUBLIC_KEY_FAILED, PUBLIC_KEY_REQUEST};
use aqc_security::{KeyStore, SecurityError};
use aqc_store::{ReadingStore, SensorRegistry};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::observer::ServerObserver;

/// Shared state every connection worker needs.
pub(crate) struct ConnectionContext {
    pub keys: Arc<KeyStore>,
    pub registry: Arc<dyn SensorRegistry>,
    pub store: Arc<dyn ReadingStore>,
    pub observer: Arc<dyn ServerObserver>,
    pub recv_timeout: Duration,
    pub clients: Arc<Mutex<HashSet<SocketAddr>>>,
}

/// Why a session reached its terminal state.
enum CloseReason {
    PeerClosed,
    IdleTimeout,
    Shutdown,
    Io(std::io::Error),
    Unregistered(u16),
    RegistryUnavailable(String),
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseReason::PeerClosed => write!(f, "peer closed the connection"),
            CloseReason::IdleTimeout => write!(f, "receive timeout"),
            CloseReason::Shutdown => write!(f, "server shutdown"),
            CloseReason::Io(err) => write!(f, "io error: {err}"),
            CloseReason::Unregistered(id) => write!(f, "unregistered sensor id {id}"),
            CloseReason::RegistryUnavailable(reason) => {
                write!(f, "registry unavailable: {reason}")
            }
        }
    }
}

enum BlockOutcome {
    Continue,
    Close(CloseReason),
}

/// Entry point spawned per accepted connection.
pub(crate) async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    ctx: Arc<ConnectionContext>,
    shutdown: broadcast::Receiver<()>,
) {
    ctx.clients.lock().insert(peer);
    ctx.observer.on_client_connected(peer);
    info!(%peer, "client connected");

    let reason = drive(stream, peer, &ctx, shutdown).await;
    match reason {
        CloseReason::Io(_) | CloseReason::Unregistered(_) | CloseReason::RegistryUnavailable(_) => {
            warn!(%peer, %reason, "session closed")
        }
        _ => info!(%peer, %reason, "session closed"),
    }
    ctx.observer.on_log(&format!("session {peer} closed: {reason}"));

    ctx.clients.lock().remove(&peer);
    ctx.observer.on_client_disconnected(peer);
}

async fn drive(
    mut stream: TcpStream,
    peer: SocketAddr,
    ctx: &ConnectionContext,
    mut shutdown: broadcast::Receiver<()>,
) -> CloseReason {
    let cipher_len = ctx.keys.ciphertext_len();
    let mut stash: Vec<u8> = Vec::with_capacity(cipher_len);
    let mut buf = vec![0u8; 1024];

    loop {
        // Drain every complete ciphertext before going back to the socket;
        // a single receive may have coalesced several blocks.
        while stash.len() >= cipher_len {
            let block: Vec<u8> = stash.drain(..cipher_len).collect();
            match process_block(&block, peer, ctx) {
                BlockOutcome::Continue => {}
                BlockOutcome::Close(reason) => return reason,
            }
        }

        let read = tokio::select! {
            _ = shutdown.recv() => return CloseReason::Shutdown,
            read = timeout(ctx.recv_timeout, stream.read(&mut buf)) => read,
        };

        let n = match read {
            Err(_) => return CloseReason::IdleTimeout,
            Ok(Err(err)) => return CloseReason::Io(err),
            Ok(Ok(0)) => return CloseReason::PeerClosed,
            Ok(Ok(n)) => n,
        };

        let chunk = &buf[..n];
        // Length first, then content: the bootstrap literal is far shorter
        // than any ciphertext, so a partial ciphertext can never match it.
        if stash.is_empty() && chunk.len() == PUBLIC_KEY_REQUEST.len() && chunk == PUBLIC_KEY_REQUEST
        {
            info!(%peer, "public key requested");
            let reply = bootstrap_reply(ctx.keys.public_key_pem());
            if let Err(err) = stream.write_all(&reply).await {
                return CloseReason::Io(err);
            }
            continue;
        }
        stash.extend_from_slice(chunk);
    }
}

/// Decrypt, decode, admit, and persist one ciphertext block.
fn process_block(block: &[u8], peer: SocketAddr, ctx: &ConnectionContext) -> BlockOutcome {
    let plaintext = match ctx.keys.decrypt(block) {
        Ok(plaintext) => plaintext,
        Err(err) => {
            warn!(%peer, error = %err, "dropping undecryptable message");
            ctx.observer.on_log(&format!("undecryptable message from {peer}"));
            return BlockOutcome::Continue;
        }
    };

    let record = match ParsedFrame::decode(&plaintext) {
        Ok(record) => record,
        Err(err) => {
            warn!(%peer, error = %err, "dropping malformed frame");
            ctx.observer.on_log(&format!("malformed frame from {peer}: {err}"));
            return BlockOutcome::Continue;
        }
    };

    // Admission control: an unknown sensor ID is connection-fatal, and the
    // registry being unreachable is treated the same way (fail closed).
    let registered = match ctx.registry.registered_ids() {
        Ok(ids) => ids,
        Err(err) => return BlockOutcome::Close(CloseReason::RegistryUnavailable(err.to_string())),
    };
    if !registered.contains(&record.sensor_id) {
        return BlockOutcome::Close(CloseReason::Unregistered(record.sensor_id));
    }

    debug!(
        %peer,
        sensor_id = record.sensor_id,
        temperature = record.temperature,
        dissolved_oxygen = record.dissolved_oxygen,
        water_temperature = record.water_temperature,
        timestamp = %record.timestamp_string(),
        "telemetry admitted"
    );

    if let Err(err) = ctx.store.insert_reading(&record) {
        // Persistence trouble is logged but does not cost the session.
        warn!(%peer, error = %err, "failed to persist reading");
        ctx.observer.on_log(&format!("persist failure for {peer}: {err}"));
    }
    ctx.observer.on_data_received(&record, peer);
    BlockOutcome::Continue
}

/// Build the length-prefixed bootstrap reply: `uint32_be(len) || body`.
///
/// When no key material is available the body is the error literal, so a
/// requester always gets a well-formed, promptly terminated answer instead
/// of a hang.
pub(crate) fn bootstrap_reply(
    pem: std::result::Result<String, SecurityError>,
) -> Vec<u8> {
    let body: Vec<u8> = match pem {
        Ok(pem) => pem.into_bytes(),
        Err(err) => {
            warn!(error = %err, "public key unavailable for bootstrap");
            PUBLIC_KEY_FAILED.to_vec()
        }
    };
    let mut reply = Vec::with_capacity(4 + body.len());
    reply.extend_from_slice(&(body.len() as u32).to_be_bytes());
    reply.extend_from_slice(&body);
    reply
}
