//! ---
//! aqc_section: "02-wire-protocol"
//! aqc_subsection: "module"
//! aqc_type: "source"
//! aqc_scope: "code"
//! aqc_description: "Telemetry frame layout and geospatial codec."
//! aqc_version: "v0.0.0-prealpha"
//! aqc_owner: "tbd"
//! ---
//! Interleaved-bisection geocode packing a coordinate pair into base-32 text.
//!
//! Bits alternate between axes starting with longitude; each output symbol
//! carries five bits. Decoding replays the bisection and returns the midpoint
//! of the final ranges, so a round trip is exact only to the resolution
//! implied by `5 * precision` bits split between the two axes.

/// Base-32 alphabet used by the codec (`a`, `i`, `l`, `o` excluded).
const ALPHABET: &[u8; 32] = b"0123456789bcdefghjkmnpqrstuvwxyz";

/// Highest supported precision; fills the 10-byte frame location field.
pub const MAX_PRECISION: usize = 10;

/// Errors raised by the geohash codec.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GeohashError {
    /// Latitude outside the valid domain.
    #[error("latitude {0} outside [-90, 90]")]
    LatitudeRange(f64),
    /// Longitude outside the valid domain.
    #[error("longitude {0} outside [-180, 180]")]
    LongitudeRange(f64),
    /// Precision outside the supported window.
    #[error("precision {0} outside [1, {MAX_PRECISION}]")]
    PrecisionRange(usize),
    /// Input byte not part of the base-32 alphabet.
    #[error("byte {0:#04x} is not a geohash symbol")]
    InvalidSymbol(u8),
}

fn symbol_value(byte: u8) -> Result<u32, GeohashError> {
    ALPHABET
        .iter()
        .position(|&c| c == byte)
        .map(|idx| idx as u32)
        .ok_or(GeohashError::InvalidSymbol(byte))
}

/// Encode a coordinate pair as a geohash of length `precision`.
pub fn geohash_encode(lat: f64, lon: f64, precision: usize) -> Result<String, GeohashError> {
    if !(-90.0..=90.0).contains(&lat) {
        return Err(GeohashError::LatitudeRange(lat));
    }
    if !(-180.0..=180.0).contains(&lon) {
        return Err(GeohashError::LongitudeRange(lon));
    }
    if !(1..=MAX_PRECISION).contains(&precision) {
        return Err(GeohashError::PrecisionRange(precision));
    }

    let mut lat_range = (-90.0f64, 90.0f64);
    let mut lon_range = (-180.0f64, 180.0f64);
    let mut out = String::with_capacity(precision);
    let mut ch = 0u32;
    let mut bit = 0u8;
    let mut is_lon = true;

    while out.len() < precision {
        if is_lon {
            let mid = (lon_range.0 + lon_range.1) / 2.0;
            if lon >= mid {
                ch = (ch << 1) | 1;
                lon_range.0 = mid;
            } else {
                ch <<= 1;
                lon_range.1 = mid;
            }
        } else {
            let mid = (lat_range.0 + lat_range.1) / 2.0;
            if lat >= mid {
                ch = (ch << 1) | 1;
                lat_range.0 = mid;
            } else {
                ch <<= 1;
                lat_range.1 = mid;
            }
        }
        is_lon = !is_lon;

        bit += 1;
        if bit == 5 {
            out.push(ALPHABET[ch as usize] as char);
            bit = 0;
            ch = 0;
        }
    }

    Ok(out)
}

/// Decode a geohash back to a `(latitude, longitude)` midpoint.
pub fn geohash_decode(geohash: &[u8]) -> Result<(f64, f64), GeohashError> {
    let mut lat_range = (-90.0f64, 90.0f64);
    let mut lon_range = (-180.0f64, 180.0f64);

    // Even bit positions steer longitude, odd positions latitude.
    let mut position = 0usize;
    for &byte in geohash {
        let value = symbol_value(byte)?;
        for shift in (0..5).rev() {
            let bit_set = (value >> shift) & 1 == 1;
            if position % 2 == 0 {
                let mid = (lon_range.0 + lon_range.1) / 2.0;
                if bit_set {
                    lon_range.0 = mid;
                } else {
                    lon_range.1 = mid;
                }
            } else {
                let mid = (lat_range.0 + lat_range.1) / 2.0;
                if bit_set {
                    lat_range.0 = mid;
                } else {
                    lat_range.1 = mid;
                }
            }
            position += 1;
        }
    }

    let lat = (lat_range.0 + lat_range.1) / 2.0;
    let lon = (lon_range.0 + lon_range.1) / 2.0;
    Ok((lat, lon))
}
