//! ---
//! aqc_section: "05-ingestion-server"
//! aqc_subsection: "module"
//! aqc_type: "source"
//! aqc_scope: "code"
//! aqc_description: "Concurrent ingestion server for encrypted telemetry."
//! aqc_version: "v0.0.0-prealpha"
//! aqc_owner: "tbd"
//! ---
//! Advisory single-instance enforcement.
//!
//! Before the real listener binds, the target port is probed with a throwaway
//! bind/close and a `server_<port>.pid` marker is written. The marker is
//! advisory only; the port probe is what actually refuses a second instance
//! on the same host; a stale marker from a crashed process is logged and
//! replaced.

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::{Result, ServerError};

/// Holds the pid marker for a running listener; removes it on release.
#[derive(Debug)]
pub struct InstanceGuard {
    pid_path: PathBuf,
    released: bool,
}

impl InstanceGuard {
    /// Probe `listen` for availability and write the pid marker.
    pub fn acquire(listen: SocketAddr, pid_dir: &Path) -> Result<Self> {
        fs::create_dir_all(pid_dir)?;
        let pid_path = pid_dir.join(format!("server_{}.pid", listen.port()));

        if pid_path.exists() {
            match fs::read_to_string(&pid_path) {
                Ok(contents) => {
                    warn!(
                        marker = %pid_path.display(),
                        stale_pid = contents.trim(),
                        "existing instance marker found; another server may be running"
                    );
                }
                Err(err) => {
                    warn!(marker = %pid_path.display(), error = %err, "unreadable instance marker; replacing");
                }
            }
        }

        // Throwaway bind without SO_REUSEADDR: an occupied port means a live
        // instance, and the server must refuse to start.
        let probe = std::net::TcpListener::bind(listen)
            .map_err(|err| ServerError::PortUnavailable(listen.port(), err))?;
        drop(probe);
        debug!(%listen, "port probe succeeded");

        fs::write(&pid_path, std::process::id().to_string())?;
        info!(marker = %pid_path.display(), pid = std::process::id(), "instance marker written");
        Ok(Self {
            pid_path,
            released: false,
        })
    }

    /// Path of the pid marker file.
    pub fn pid_path(&self) -> &Path {
        &self.pid_path
    }

    /// Remove the marker. Safe to call more than once.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        match fs::remove_file(&self.pid_path) {
            Ok(()) => info!(marker = %self.pid_path.display(), "instance marker removed"),
            Err(err) => warn!(marker = %self.pid_path.display(), error = %err, "failed to remove instance marker"),
        }
    }
}

impl Drop for InstanceGuard {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_writes_and_release_removes_marker() {
        let dir = tempfile::tempdir().unwrap();
        let listen: SocketAddr = "127.0.0.1:0".parse().unwrap();

        let mut guard = InstanceGuard::acquire(listen, dir.path()).unwrap();
        let contents = fs::read_to_string(guard.pid_path()).unwrap();
        assert_eq!(contents, std::process::id().to_string());

        guard.release();
        assert!(!guard.pid_path().exists());
    }

    #[test]
    fn drop_removes_marker() {
        let dir = tempfile::tempdir().unwrap();
        let listen: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let pid_path = {
            let guard = InstanceGuard::acquire(listen, dir.path()).unwrap();
            guard.pid_path().to_path_buf()
        };
        assert!(!pid_path.exists());
    }

    #[test]
    fn occupied_port_refuses_acquisition() {
        let holder = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let occupied = holder.local_addr().unwrap();
        let dir = tempfile::tempdir().unwrap();

        let result = InstanceGuard::acquire(occupied, dir.path());
        assert!(matches!(result, Err(ServerError::PortUnavailable(_, _))));
        assert!(!dir.path().join(format!("server_{}.pid", occupied.port())).exists());
    }

    #[test]
    fn stale_marker_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let listen: SocketAddr = "127.0.0.1:0".parse().unwrap();
        fs::write(dir.path().join("server_0.pid"), "99999").unwrap();

        let guard = InstanceGuard::acquire(listen, dir.path()).unwrap();
        let contents = fs::read_to_string(guard.pid_path()).unwrap();
        assert_eq!(contents, std::process::id().to_string());
    }
}
