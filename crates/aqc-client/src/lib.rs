//! ---
//! aqc_section: "06-sensor-client"
//! aqc_subsection: "module"
//! aqc_type: "source"
//! aqc_scope: "code"
//! aqc_description: "Sensor node client for encrypted telemetry."
//! aqc_version: "v0.0.0-prealpha"
//! aqc_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Protocol counterpart to the ingestion server.
//!
//! A node first obtains the server's public key (local PEM cache when usable,
//! otherwise the in-band bootstrap exchange), then connects and periodically
//! sends one OAEP-encrypted 32-byte frame.

use std::time::Duration;

use aqc_common::config::ClientConfig;
use aqc_proto::{FrameError, SensorFrame, FRAME_LEN, PUBLIC_KEY_REQUEST};
use aqc_security::SecurityError;
use rand::Rng;
use rsa::RsaPublicKey;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Upper bound on a sane bootstrap reply; a PEM public key is well under this.
const MAX_KEY_REPLY: u32 = 64 * 1024;

/// Shared result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors raised by the sensor node.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Socket-level failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Key material problem (load, parse, encrypt).
    #[error(transparent)]
    Security(#[from] SecurityError),
    /// Frame construction failure.
    #[error(transparent)]
    Frame(#[from] FrameError),
    /// The bootstrap exchange did not complete within the bound.
    #[error("public key bootstrap timed out after {0:?}")]
    BootstrapTimeout(Duration),
    /// The server answered the bootstrap with an in-band error.
    #[error("bootstrap refused by server: {0}")]
    BootstrapRefused(String),
    /// The declared reply length was implausible.
    #[error("bootstrap reply of {0} bytes exceeds the sanity bound")]
    ReplyTooLarge(u32),
}

/// Fetch the server's public key over the wire.
///
/// Sends the plaintext request literal and accumulates the length-prefixed
/// PEM reply; a single receive is never assumed to deliver the whole key.
/// The entire exchange is bounded by `timeout`.
pub async fn request_public_key(addr: &str, timeout: Duration) -> Result<RsaPublicKey> {
    let exchange = async {
        let mut stream = TcpStream::connect(addr).await?;
        stream.write_all(PUBLIC_KEY_REQUEST).await?;

        let mut len_bytes = [0u8; 4];
        stream.read_exact(&mut len_bytes).await?;
        let len = u32::from_be_bytes(len_bytes);
        if len > MAX_KEY_REPLY {
            return Err(ClientError::ReplyTooLarge(len));
        }

        let mut body = vec![0u8; len as usize];
        stream.read_exact(&mut body).await?;

        if body.starts_with(b"ERROR:") {
            return Err(ClientError::BootstrapRefused(
                String::from_utf8_lossy(&body).into_owned(),
            ));
        }
        let pem = String::from_utf8_lossy(&body);
        Ok(aqc_security::public_key_from_pem(&pem)?)
    };

    match tokio::time::timeout(timeout, exchange).await {
        Ok(result) => result,
        Err(_) => Err(ClientError::BootstrapTimeout(timeout)),
    }
}

/// Obtain the server's public key: local cache first, then the network.
///
/// A key fetched over the wire is cached back to the configured path on a
/// best-effort basis.
pub async fn obtain_public_key(config: &ClientConfig) -> Result<RsaPublicKey> {
    if config.public_key_path.exists() {
        match aqc_security::load_public_key(&config.public_key_path) {
            Ok(key) => {
                info!(path = %config.public_key_path.display(), "loaded cached public key");
                return Ok(key);
            }
            Err(err) => {
                warn!(error = %err, "cached public key unusable; requesting from server");
            }
        }
    }

    info!(server = %config.server_addr, "requesting public key from server");
    let key = request_public_key(&config.server_addr, config.bootstrap_timeout()).await?;
    if let Err(err) = aqc_security::save_public_key(&key, &config.public_key_path) {
        warn!(error = %err, "failed to cache public key locally");
    }
    Ok(key)
}

/// Periodic telemetry sender.
pub struct SensorClient {
    config: ClientConfig,
    public_key: RsaPublicKey,
}

impl SensorClient {
    /// Assemble a client from its configuration and the server's public key.
    pub fn new(config: ClientConfig, public_key: RsaPublicKey) -> Self {
        Self { config, public_key }
    }

    /// Build one sample frame: random measurements in the sensor's plausible
    /// operating ranges, the configured location, the current wall clock.
    pub fn sample_frame(&self) -> SensorFrame {
        let mut rng = rand::thread_rng();
        SensorFrame {
            sensor_id: self.config.sensor_id,
            payload_len: FRAME_LEN as u32,
            temperature: rng.gen_range(15.0..35.0),
            dissolved_oxygen: rng.gen_range(18.0..25.0),
            water_temperature: rng.gen_range(15.0..35.0),
            latitude: self.config.latitude,
            longitude: self.config.longitude,
            timestamp: chrono::Local::now().naive_local(),
        }
    }

    /// Encrypt and transmit one frame on an open connection.
    pub async fn send_once(&self, stream: &mut TcpStream) -> Result<()> {
        let frame = self.sample_frame();
        let wire = frame.encode()?;
        let ciphertext = aqc_security::encrypt(&wire, &self.public_key)?;
        stream.write_all(&ciphertext).await?;
        debug!(
            sensor_id = frame.sensor_id,
            ciphertext_len = ciphertext.len(),
            "telemetry sent"
        );
        Ok(())
    }

    /// Connect and send forever at the configured interval.
    ///
    /// The caller decides when to stop, typically by racing this future
    /// against a termination signal.
    pub async fn run(&self) -> Result<()> {
        let mut stream = TcpStream::connect(&self.config.server_addr).await?;
        info!(server = %self.config.server_addr, sensor_id = self.config.sensor_id, "connected");
        loop {
            self.send_once(&mut stream).await?;
            tokio::time::sleep(self.config.send_interval()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aqc_proto::ParsedFrame;
    use aqc_security::KeyStore;
    use std::sync::{Arc, OnceLock};
    use tokio::net::TcpListener;

    fn shared_keys() -> Arc<KeyStore> {
        static KEYS: OnceLock<Arc<KeyStore>> = OnceLock::new();
        KEYS.get_or_init(|| Arc::new(KeyStore::generate().unwrap()))
            .clone()
    }

    fn client_config(addr: String, dir: &std::path::Path) -> ClientConfig {
        ClientConfig {
            server_addr: addr,
            sensor_id: 1234,
            public_key_path: dir.join("public.pem"),
            bootstrap_timeout_secs: 2,
            ..ClientConfig::default()
        }
    }

    #[test]
    fn sample_frame_is_encodable_and_valid() {
        let keys = shared_keys();
        let dir = tempfile::tempdir().unwrap();
        let client = SensorClient::new(
            client_config("unused".into(), dir.path()),
            keys.public_key().clone(),
        );
        for _ in 0..16 {
            let frame = client.sample_frame();
            let parsed = ParsedFrame::decode(&frame.encode().unwrap()).unwrap();
            assert_eq!(parsed.sensor_id, 1234);
            assert!((15.0..35.1).contains(&parsed.temperature));
            assert!((18.0..25.1).contains(&parsed.dissolved_oxygen));
            assert!((parsed.latitude - 37.5).abs() < 1e-4);
        }
    }

    #[tokio::test]
    async fn bootstrap_accumulates_length_prefixed_key() {
        let keys = shared_keys();
        let pem = keys.public_key_pem().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let served = pem.clone();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = vec![0u8; PUBLIC_KEY_REQUEST.len()];
            stream.read_exact(&mut request).await.unwrap();
            assert_eq!(request, PUBLIC_KEY_REQUEST);

            let body = served.as_bytes();
            stream
                .write_all(&(body.len() as u32).to_be_bytes())
                .await
                .unwrap();
            // Dribble the key in two writes; the client must accumulate.
            let split = body.len() / 2;
            stream.write_all(&body[..split]).await.unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
            stream.write_all(&body[split..]).await.unwrap();
        });

        let key = request_public_key(&addr.to_string(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(&key, keys.public_key());
    }

    #[tokio::test]
    async fn bootstrap_error_reply_is_surfaced() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = vec![0u8; PUBLIC_KEY_REQUEST.len()];
            stream.read_exact(&mut request).await.unwrap();
            let body = aqc_proto::PUBLIC_KEY_FAILED;
            stream
                .write_all(&(body.len() as u32).to_be_bytes())
                .await
                .unwrap();
            stream.write_all(body).await.unwrap();
        });

        let err = request_public_key(&addr.to_string(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::BootstrapRefused(_)));
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let err = request_public_key(&addr.to_string(), Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::BootstrapTimeout(_)));
    }

    #[tokio::test]
    async fn obtain_prefers_local_cache() {
        let keys = shared_keys();
        let dir = tempfile::tempdir().unwrap();
        let config = client_config("127.0.0.1:1".into(), dir.path());
        aqc_security::save_public_key(keys.public_key(), &config.public_key_path).unwrap();

        // The server address is unroutable; only the cache can satisfy this.
        let key = obtain_public_key(&config).await.unwrap();
        assert_eq!(&key, keys.public_key());
    }
}
