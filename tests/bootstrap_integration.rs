//! ---
//! aqc_section: "09-testing-qa"
//! aqc_subsection: "integration-tests"
//! aqc_type: "source"
//! aqc_scope: "code"
//! aqc_description: "Integration and validation tests for the AquaCon stack."
//! aqc_version: "v0.0.0-prealpha"
//! aqc_owner: "tbd"
//! ---
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use aqc_common::config::{ClientConfig, ServerConfig};
use aqc_security::KeyStore;
use aqc_server::IngestServer;
use aqc_store::{MemoryStore, StaticRegistry};

fn shared_keys() -> Arc<KeyStore> {
    static KEYS: OnceLock<Arc<KeyStore>> = OnceLock::new();
    KEYS.get_or_init(|| Arc::new(KeyStore::generate().unwrap()))
        .clone()
}

fn server_config(pid_dir: &std::path::Path) -> ServerConfig {
    ServerConfig {
        listen: "127.0.0.1:0".parse().unwrap(),
        recv_timeout_secs: 3,
        pid_dir: pid_dir.to_path_buf(),
        ..ServerConfig::default()
    }
}

/// The in-band bootstrap against a live server yields the server's own key.
#[tokio::test]
async fn bootstrap_returns_servers_public_key() {
    let dir = tempfile::tempdir().unwrap();
    let keys = shared_keys();
    let server = IngestServer::new(
        server_config(dir.path()),
        keys.clone(),
        Arc::new(StaticRegistry::new([])),
        Arc::new(MemoryStore::new()),
    );
    let handle = server.start().await.unwrap();

    let key = aqc_client::request_public_key(
        &handle.local_addr().to_string(),
        Duration::from_secs(5),
    )
    .await
    .unwrap();
    assert_eq!(&key, keys.public_key());

    handle.shutdown().await.unwrap();
}

/// With no local cache the client fetches over the wire and writes the cache;
/// a second call is satisfied from disk alone.
#[tokio::test]
async fn obtain_public_key_populates_and_reuses_cache() {
    let dir = tempfile::tempdir().unwrap();
    let keys = shared_keys();
    let server = IngestServer::new(
        server_config(dir.path()),
        keys.clone(),
        Arc::new(StaticRegistry::new([])),
        Arc::new(MemoryStore::new()),
    );
    let handle = server.start().await.unwrap();

    let cache = dir.path().join("node/public.pem");
    let config = ClientConfig {
        server_addr: handle.local_addr().to_string(),
        public_key_path: cache.clone(),
        bootstrap_timeout_secs: 5,
        ..ClientConfig::default()
    };

    assert!(!cache.exists());
    let fetched = aqc_client::obtain_public_key(&config).await.unwrap();
    assert_eq!(&fetched, keys.public_key());
    assert!(cache.exists());

    handle.shutdown().await.unwrap();

    // Server gone; only the cache can answer now.
    let cached = aqc_client::obtain_public_key(&config).await.unwrap();
    assert_eq!(&cached, keys.public_key());
}

/// The bootstrap exchange and encrypted ingestion share one listener; a key
/// fetched in-band immediately works for encrypted telemetry.
#[tokio::test]
async fn bootstrap_and_telemetry_share_the_listener() {
    use aqc_proto::SensorFrame;
    use chrono::NaiveDate;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream;

    let dir = tempfile::tempdir().unwrap();
    let keys = shared_keys();
    let store = Arc::new(MemoryStore::new());
    let server = IngestServer::new(
        server_config(dir.path()),
        keys.clone(),
        Arc::new(StaticRegistry::new([11])),
        store.clone(),
    );
    let handle = server.start().await.unwrap();
    let addr = handle.local_addr();

    let key =
        aqc_client::request_public_key(&addr.to_string(), Duration::from_secs(5))
            .await
            .unwrap();

    let frame = SensorFrame {
        sensor_id: 11,
        payload_len: 32,
        temperature: 20.0,
        dissolved_oxygen: 9.1,
        water_temperature: 19.5,
        latitude: 37.5,
        longitude: 127.0,
        timestamp: NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap(),
    };
    let ciphertext = aqc_security::encrypt(&frame.encode().unwrap(), &key).unwrap();
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(&ciphertext).await.unwrap();

    for _ in 0..150 {
        if store.len() == 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(store.len(), 3);

    drop(stream);
    handle.shutdown().await.unwrap();
}
