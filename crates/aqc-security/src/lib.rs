//! ---
//! aqc_section: "03-transport-security"
//! aqc_subsection: "module"
//! aqc_type: "source"
//! aqc_scope: "code"
//! aqc_description: "RSA key pair lifecycle and OAEP transport encryption."
//! aqc_version: "v0.0.0-prealpha"
//! aqc_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Transport security for AquaCon telemetry.
//!
//! The server owns a 2048-bit RSA key pair for the process lifetime; clients
//! encrypt each 32-byte frame with the public key under OAEP/SHA-256 padding.
//! Key material is persisted as PEM so a restarted server keeps its identity
//! and already-distributed public keys stay valid.

use std::path::{Path, PathBuf};

use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use tracing::{debug, info};

/// Modulus size for generated key pairs.
pub const KEY_BITS: usize = 2048;

/// OAEP digest output length in bytes (SHA-256).
const OAEP_HASH_LEN: usize = 32;

/// Shared result type for security operations.
pub type Result<T> = std::result::Result<T, SecurityError>;

/// Errors raised by key management and transport encryption.
#[derive(Debug, thiserror::Error)]
pub enum SecurityError {
    /// Key file absent or malformed. Fatal at startup.
    #[error("failed to load key material from {path}: {reason}")]
    KeyLoad {
        /// Path that was read.
        path: PathBuf,
        /// Parser or IO failure description.
        reason: String,
    },
    /// Key file could not be written.
    #[error("failed to persist key material to {path}: {reason}")]
    KeyStore {
        /// Path that was written.
        path: PathBuf,
        /// Encoder or IO failure description.
        reason: String,
    },
    /// Key pair generation failed.
    #[error("key generation failed: {0}")]
    KeyGeneration(rsa::Error),
    /// Plaintext exceeds the OAEP ceiling for the key size.
    #[error("plaintext of {len} bytes exceeds the {max}-byte OAEP ceiling")]
    PayloadTooLarge {
        /// Offered plaintext length.
        len: usize,
        /// Maximum plaintext the key can wrap.
        max: usize,
    },
    /// Encryption failed inside the RSA primitive.
    #[error("encryption failed: {0}")]
    Encrypt(rsa::Error),
    /// Ciphertext did not decrypt. Recoverable, per-message.
    #[error("decryption failed: {0}")]
    Decrypt(rsa::Error),
}

/// Server-side key pair with its OAEP operations.
pub struct KeyStore {
    private: RsaPrivateKey,
    public: RsaPublicKey,
}

impl KeyStore {
    /// Generate a fresh [`KEY_BITS`] key pair.
    pub fn generate() -> Result<Self> {
        Self::generate_bits(KEY_BITS)
    }

    fn generate_bits(bits: usize) -> Result<Self> {
        let mut rng = rand::thread_rng();
        let private = RsaPrivateKey::new(&mut rng, bits).map_err(SecurityError::KeyGeneration)?;
        let public = RsaPublicKey::from(&private);
        info!(bits, "generated RSA key pair");
        Ok(Self { private, public })
    }

    /// Load a key pair from a PEM private key; the public half is derived.
    pub fn load<P: AsRef<Path>>(private_path: P) -> Result<Self> {
        let path = private_path.as_ref();
        let private = RsaPrivateKey::read_pkcs8_pem_file(path).map_err(|err| {
            SecurityError::KeyLoad {
                path: path.to_path_buf(),
                reason: err.to_string(),
            }
        })?;
        let public = RsaPublicKey::from(&private);
        debug!(path = %path.display(), "loaded private key");
        Ok(Self { private, public })
    }

    /// Reuse the persisted pair when it parses, otherwise generate and
    /// persist a fresh one. The server calls this once at startup.
    pub fn load_or_generate<P: AsRef<Path>, Q: AsRef<Path>>(
        private_path: P,
        public_path: Q,
    ) -> Result<Self> {
        let private_path = private_path.as_ref();
        let public_path = public_path.as_ref();
        if private_path.exists() {
            match Self::load(private_path) {
                Ok(store) => {
                    info!(path = %private_path.display(), "reusing persisted key pair");
                    // Republish the public half in case it went missing.
                    if !public_path.exists() {
                        save_public_key(&store.public, public_path)?;
                    }
                    return Ok(store);
                }
                Err(err) => {
                    tracing::warn!(error = %err, "persisted private key unusable; regenerating");
                }
            }
        }
        let store = Self::generate()?;
        store.persist(private_path, public_path)?;
        Ok(store)
    }

    /// Write both halves of the pair as PEM.
    pub fn persist<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        private_path: P,
        public_path: Q,
    ) -> Result<()> {
        let private_path = private_path.as_ref();
        self.private
            .write_pkcs8_pem_file(private_path, LineEnding::LF)
            .map_err(|err| SecurityError::KeyStore {
                path: private_path.to_path_buf(),
                reason: err.to_string(),
            })?;
        save_public_key(&self.public, public_path.as_ref())?;
        info!(path = %private_path.display(), "persisted key pair");
        Ok(())
    }

    /// The public half of the pair.
    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public
    }

    /// Public key rendered as PEM for the bootstrap reply.
    pub fn public_key_pem(&self) -> Result<String> {
        self.public
            .to_public_key_pem(LineEnding::LF)
            .map_err(|err| SecurityError::KeyStore {
                path: PathBuf::from("<memory>"),
                reason: err.to_string(),
            })
    }

    /// Largest plaintext this key can wrap under OAEP/SHA-256.
    pub fn max_plaintext_len(&self) -> usize {
        max_plaintext_len(&self.public)
    }

    /// Exact ciphertext length produced by this key.
    pub fn ciphertext_len(&self) -> usize {
        ciphertext_len(&self.public)
    }

    /// Unwrap one ciphertext. Failure is recoverable: the caller drops the
    /// message and keeps the session open.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        self.private
            .decrypt(Oaep::new::<Sha256>(), ciphertext)
            .map_err(SecurityError::Decrypt)
    }
}

impl std::fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyStore")
            .field("bits", &(self.public.size() * 8))
            .finish_non_exhaustive()
    }
}

/// Load a PEM public key, e.g. the client's cached copy.
pub fn load_public_key<P: AsRef<Path>>(path: P) -> Result<RsaPublicKey> {
    let path = path.as_ref();
    RsaPublicKey::read_public_key_pem_file(path).map_err(|err| SecurityError::KeyLoad {
        path: path.to_path_buf(),
        reason: err.to_string(),
    })
}

/// Parse a PEM public key received over the wire.
pub fn public_key_from_pem(pem: &str) -> Result<RsaPublicKey> {
    RsaPublicKey::from_public_key_pem(pem).map_err(|err| SecurityError::KeyLoad {
        path: PathBuf::from("<wire>"),
        reason: err.to_string(),
    })
}

/// Persist a public key as PEM.
pub fn save_public_key(key: &RsaPublicKey, path: &Path) -> Result<()> {
    key.write_public_key_pem_file(path, LineEnding::LF)
        .map_err(|err| SecurityError::KeyStore {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })
}

/// Largest plaintext `key` can wrap: modulus bytes minus OAEP overhead.
pub fn max_plaintext_len(key: &RsaPublicKey) -> usize {
    key.size() - 2 * OAEP_HASH_LEN - 2
}

/// Ciphertext length for `key`; OAEP output is always the modulus size.
pub fn ciphertext_len(key: &RsaPublicKey) -> usize {
    key.size()
}

/// Wrap one plaintext for the holder of the matching private key.
pub fn encrypt(plaintext: &[u8], key: &RsaPublicKey) -> Result<Vec<u8>> {
    let max = max_plaintext_len(key);
    if plaintext.len() > max {
        return Err(SecurityError::PayloadTooLarge {
            len: plaintext.len(),
            max,
        });
    }
    let mut rng = rand::thread_rng();
    key.encrypt(&mut rng, Oaep::new::<Sha256>(), plaintext)
        .map_err(SecurityError::Encrypt)
}
