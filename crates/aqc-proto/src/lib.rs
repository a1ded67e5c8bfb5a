//! ---
//! aqc_section: "02-wire-protocol"
//! aqc_subsection: "module"
//! aqc_type: "source"
//! aqc_scope: "code"
//! aqc_description: "Telemetry frame layout and geospatial codec."
//! aqc_version: "v0.0.0-prealpha"
//! aqc_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Wire protocol for AquaCon telemetry.
//!
//! Sensor nodes transmit a fixed 32-byte frame carrying three scaled
//! measurements, a geohash-packed location, and a wall-clock timestamp. The
//! frame is protected by an additive 16-bit checksum and delimited by fixed
//! start/end markers. This crate owns the frame codec, the geohash codec it
//! embeds, and the plaintext literals of the public-key bootstrap exchange.

pub mod frame;
pub mod geohash;

/// Shared result type for codec operations.
pub type Result<T> = std::result::Result<T, FrameError>;

/// Errors raised while building or parsing a sensor frame.
///
/// Every variant is recoverable from the server's point of view: a bad frame
/// is dropped and the session continues.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// Input shorter than the fixed frame length.
    #[error("frame too short: got {0} bytes, need {1}")]
    TooShort(usize, usize),
    /// Byte 0 did not carry the start marker.
    #[error("bad start marker: {0:#04x}")]
    BadStartMarker(u8),
    /// Byte 31 did not carry the end marker.
    #[error("bad end marker: {0:#04x}")]
    BadEndMarker(u8),
    /// A physical or timestamp field fell outside its valid window.
    #[error("{field} out of range: {value}")]
    FieldOutOfRange {
        /// Name of the offending field.
        field: &'static str,
        /// Offending value after descaling.
        value: f64,
    },
    /// The transmitted checksum disagreed with the recomputed one.
    #[error("checksum mismatch: transmitted {transmitted:#06x}, computed {computed:#06x}")]
    ChecksumMismatch {
        /// Value carried at offsets 29-30.
        transmitted: u16,
        /// Value recomputed over the covered range.
        computed: u16,
    },
    /// The 10-byte location field did not decode as a geohash.
    #[error("location field: {0}")]
    Location(#[from] geohash::GeohashError),
    /// The timestamp bytes did not form a real calendar date.
    #[error("invalid calendar timestamp")]
    InvalidTimestamp,
}

/// Plaintext command a client sends to obtain the server's public key.
///
/// OAEP ciphertexts are always the full key size (256 bytes for RSA-2048),
/// so this 18-byte literal can never be mistaken for one; receivers check
/// length first, then content.
pub const PUBLIC_KEY_REQUEST: &[u8] = b"REQUEST_PUBLIC_KEY";

/// Length-prefixed reply body sent when the server cannot produce its key.
pub const PUBLIC_KEY_FAILED: &[u8] = b"ERROR: PUBLIC_KEY_FAILED";

pub use frame::{ParsedFrame, SensorFrame, END_MARKER, FRAME_LEN, START_MARKER};
pub use geohash::{geohash_decode, geohash_encode, GeohashError};
