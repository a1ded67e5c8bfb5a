//! ---
//! aqc_section: "02-wire-protocol"
//! aqc_subsection: "module"
//! aqc_type: "source"
//! aqc_scope: "code"
//! aqc_description: "Telemetry frame layout and geospatial codec."
//! aqc_version: "v0.0.0-prealpha"
//! aqc_owner: "tbd"
//! ---
//! Fixed-layout 32-byte sensor frame.
//!
//! ```text
//! 0     1     3        6      8      10      12         22    24  25  26  27  28  29     31
//! +-----+-----+--------+------+------+-------+----------+-----+---+---+---+---+---+------+---+
//! | $   | id  | length | temp | d.o. | w.temp| geohash  | yr  | mo| dy| hr| mi| se| chk  | \ |
//! +-----+-----+--------+------+------+-------+----------+-----+---+---+---+---+---+------+---+
//! ```
//!
//! All multi-byte integers are big-endian. Temperatures are scaled by 10,
//! dissolved oxygen by 100; the raw values are unsigned, so sub-zero
//! temperatures are not representable on the wire. The checksum is the
//! modulo-65536 sum of bytes `[1, 29)`: everything after the start marker up
//! to the checksum field.

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::geohash::{geohash_decode, geohash_encode, MAX_PRECISION};
use crate::{FrameError, Result};

/// Fixed frame length in bytes.
pub const FRAME_LEN: usize = 32;
/// Start-of-frame marker (`$`).
pub const START_MARKER: u8 = 0x24;
/// End-of-frame marker (`\`).
pub const END_MARKER: u8 = 0x5C;

/// Byte range covered by the additive checksum.
const CHECKSUM_RANGE: std::ops::Range<usize> = 1..29;

/// Modulo-65536 sum of the checksum-covered byte range.
pub fn checksum(frame: &[u8]) -> u16 {
    frame[CHECKSUM_RANGE]
        .iter()
        .fold(0u32, |acc, &b| acc + u32::from(b)) as u16
}

fn scale_field(value: f64, factor: f64, min: f64, max: f64, field: &'static str) -> Result<u16> {
    if !(min..=max).contains(&value) {
        return Err(FrameError::FieldOutOfRange { field, value });
    }
    Ok((value * factor).round() as u16)
}

fn check_range(value: f64, min: f64, max: f64, field: &'static str) -> Result<f64> {
    if !(min..=max).contains(&value) {
        return Err(FrameError::FieldOutOfRange { field, value });
    }
    Ok(value)
}

/// Logical fields of a telemetry frame, prior to encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorFrame {
    /// Sensor identifier checked against the registry on ingest.
    pub sensor_id: u16,
    /// Declared payload length (24-bit on the wire).
    pub payload_len: u32,
    /// Air temperature in °C.
    pub temperature: f64,
    /// Dissolved oxygen in ppm.
    pub dissolved_oxygen: f64,
    /// Water temperature in °C.
    pub water_temperature: f64,
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Measurement timestamp (wall clock, second resolution).
    pub timestamp: NaiveDateTime,
}

impl SensorFrame {
    /// Lay the fields out as a wire frame, computing the checksum.
    ///
    /// Fails when a field is not representable: the scaled measurements are
    /// stored unsigned, so the encodable temperature window is `0.0..=125.0`
    /// even though decode tolerates the sensor's full `-40.0` rating.
    pub fn encode(&self) -> Result<[u8; FRAME_LEN]> {
        let temp_raw = scale_field(self.temperature, 10.0, 0.0, 125.0, "temperature")?;
        let oxy_raw = scale_field(self.dissolved_oxygen, 100.0, 0.0, 60.0, "dissolved oxygen")?;
        let wtr_raw = scale_field(self.water_temperature, 10.0, 0.0, 100.0, "water temperature")?;
        let location = geohash_encode(self.latitude, self.longitude, MAX_PRECISION)?;

        let year = self.timestamp.year();
        if !(2000..=2099).contains(&year) {
            return Err(FrameError::FieldOutOfRange {
                field: "year",
                value: f64::from(year),
            });
        }

        let mut buf = [0u8; FRAME_LEN];
        buf[0] = START_MARKER;
        buf[1..3].copy_from_slice(&self.sensor_id.to_be_bytes());
        buf[3..6].copy_from_slice(&self.payload_len.to_be_bytes()[1..4]);
        buf[6..8].copy_from_slice(&temp_raw.to_be_bytes());
        buf[8..10].copy_from_slice(&oxy_raw.to_be_bytes());
        buf[10..12].copy_from_slice(&wtr_raw.to_be_bytes());
        buf[12..22].copy_from_slice(location.as_bytes());
        buf[22..24].copy_from_slice(&(year as u16).to_be_bytes());
        buf[24] = self.timestamp.month() as u8;
        buf[25] = self.timestamp.day() as u8;
        buf[26] = self.timestamp.hour() as u8;
        buf[27] = self.timestamp.minute() as u8;
        buf[28] = self.timestamp.second() as u8;
        let chk = checksum(&buf);
        buf[29..31].copy_from_slice(&chk.to_be_bytes());
        buf[31] = END_MARKER;
        Ok(buf)
    }
}

/// Structured record produced by [`ParsedFrame::decode`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedFrame {
    /// Sensor identifier.
    pub sensor_id: u16,
    /// Declared payload length.
    pub payload_len: u32,
    /// Air temperature in °C.
    pub temperature: f64,
    /// Dissolved oxygen in ppm.
    pub dissolved_oxygen: f64,
    /// Water temperature in °C.
    pub water_temperature: f64,
    /// Decoded latitude (geohash cell midpoint).
    pub latitude: f64,
    /// Decoded longitude (geohash cell midpoint).
    pub longitude: f64,
    /// Measurement timestamp.
    pub timestamp: NaiveDateTime,
    /// Checksum transmitted with the frame.
    pub checksum: u16,
}

impl ParsedFrame {
    /// Parse and validate a wire frame.
    ///
    /// Validation order mirrors the wire contract: length, start marker,
    /// measurement ranges, location, timestamp components, checksum, end
    /// marker. Longer inputs are accepted; only the first 32 bytes are read.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < FRAME_LEN {
            return Err(FrameError::TooShort(data.len(), FRAME_LEN));
        }
        if data[0] != START_MARKER {
            return Err(FrameError::BadStartMarker(data[0]));
        }

        let sensor_id = u16::from_be_bytes([data[1], data[2]]);
        let payload_len = u32::from_be_bytes([0, data[3], data[4], data[5]]);

        let temperature = check_range(
            f64::from(u16::from_be_bytes([data[6], data[7]])) / 10.0,
            -40.0,
            125.0,
            "temperature",
        )?;
        let dissolved_oxygen = check_range(
            f64::from(u16::from_be_bytes([data[8], data[9]])) / 100.0,
            0.0,
            60.0,
            "dissolved oxygen",
        )?;
        let water_temperature = check_range(
            f64::from(u16::from_be_bytes([data[10], data[11]])) / 10.0,
            0.0,
            100.0,
            "water temperature",
        )?;

        let (latitude, longitude) = geohash_decode(&data[12..22])?;

        let year = u16::from_be_bytes([data[22], data[23]]);
        check_range(f64::from(year), 2000.0, 2099.0, "year")?;
        let month = data[24];
        check_range(f64::from(month), 1.0, 12.0, "month")?;
        let day = data[25];
        check_range(f64::from(day), 1.0, 31.0, "day")?;
        let hour = data[26];
        check_range(f64::from(hour), 0.0, 23.0, "hour")?;
        let minute = data[27];
        check_range(f64::from(minute), 0.0, 59.0, "minute")?;
        let second = data[28];
        check_range(f64::from(second), 0.0, 59.0, "second")?;

        let timestamp = NaiveDate::from_ymd_opt(i32::from(year), u32::from(month), u32::from(day))
            .and_then(|date| {
                date.and_hms_opt(u32::from(hour), u32::from(minute), u32::from(second))
            })
            .ok_or(FrameError::InvalidTimestamp)?;

        let transmitted = u16::from_be_bytes([data[29], data[30]]);
        let computed = checksum(data);
        if transmitted != computed {
            return Err(FrameError::ChecksumMismatch {
                transmitted,
                computed,
            });
        }

        if data[31] != END_MARKER {
            return Err(FrameError::BadEndMarker(data[31]));
        }

        Ok(Self {
            sensor_id,
            payload_len,
            temperature,
            dissolved_oxygen,
            water_temperature,
            latitude,
            longitude,
            timestamp,
            checksum: transmitted,
        })
    }

    /// Timestamp formatted as `YYYY-MM-DD HH:MM:SS`.
    pub fn timestamp_string(&self) -> String {
        self.timestamp.format("%Y-%m-%d %H:%M:%S").to_string()
    }

    /// Location rendered as `lat,lon` with six decimal places.
    pub fn location_string(&self) -> String {
        format!("{:.6},{:.6}", self.latitude, self.longitude)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_frame() -> SensorFrame {
        SensorFrame {
            sensor_id: 1234,
            payload_len: FRAME_LEN as u32,
            temperature: 23.5,
            dissolved_oxygen: 21.30,
            water_temperature: 23.5,
            latitude: 37.5,
            longitude: 127.0,
            timestamp: NaiveDate::from_ymd_opt(2024, 5, 1)
                .unwrap()
                .and_hms_opt(12, 0, 0)
                .unwrap(),
        }
    }

    #[test]
    fn known_frame_roundtrip() {
        let frame = sample_frame();
        let wire = frame.encode().unwrap();
        assert_eq!(wire.len(), FRAME_LEN);
        assert_eq!(wire[0], START_MARKER);
        assert_eq!(wire[31], END_MARKER);
        assert_eq!(&wire[12..22], b"wydm3fwt66");

        let parsed = ParsedFrame::decode(&wire).unwrap();
        assert_eq!(parsed.sensor_id, 1234);
        assert_eq!(parsed.payload_len, 32);
        assert_eq!(parsed.temperature, 23.5);
        assert_eq!(parsed.dissolved_oxygen, 21.3);
        assert_eq!(parsed.water_temperature, 23.5);
        assert!((parsed.latitude - 37.5).abs() < 1e-4);
        assert!((parsed.longitude - 127.0).abs() < 1e-4);
        assert_eq!(parsed.timestamp_string(), "2024-05-01 12:00:00");
        assert_eq!(parsed.checksum, checksum(&wire));
    }

    #[test]
    fn roundtrip_across_field_combinations() {
        let timestamps = [
            NaiveDate::from_ymd_opt(2000, 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
            NaiveDate::from_ymd_opt(2099, 12, 31)
                .unwrap()
                .and_hms_opt(23, 59, 59)
                .unwrap(),
        ];
        for (temp, oxy, wtr) in [(0.0, 0.0, 0.0), (125.0, 60.0, 100.0), (18.2, 7.65, 14.9)] {
            for ts in timestamps {
                let frame = SensorFrame {
                    sensor_id: 65535,
                    payload_len: FRAME_LEN as u32,
                    temperature: temp,
                    dissolved_oxygen: oxy,
                    water_temperature: wtr,
                    latitude: -12.25,
                    longitude: 44.5,
                    timestamp: ts,
                };
                let parsed = ParsedFrame::decode(&frame.encode().unwrap()).unwrap();
                assert_eq!(parsed.temperature, temp);
                assert_eq!(parsed.dissolved_oxygen, oxy);
                assert_eq!(parsed.water_temperature, wtr);
                assert_eq!(parsed.timestamp, ts);
            }
        }
    }

    #[test]
    fn any_covered_byte_flip_is_detected() {
        let wire = sample_frame().encode().unwrap();
        for index in CHECKSUM_RANGE {
            for bit in 0..8 {
                let mut corrupted = wire;
                corrupted[index] ^= 1 << bit;
                assert!(
                    ParsedFrame::decode(&corrupted).is_err(),
                    "flip of bit {bit} at byte {index} went undetected"
                );
            }
        }
    }

    #[test]
    fn sensor_id_flip_reports_checksum_mismatch() {
        // The sensor ID has no range check of its own, so only the checksum
        // can catch corruption there.
        let mut wire = sample_frame().encode().unwrap();
        wire[2] ^= 0x01;
        assert!(matches!(
            ParsedFrame::decode(&wire),
            Err(FrameError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn bad_start_marker_always_rejected() {
        let mut wire = sample_frame().encode().unwrap();
        wire[0] = 0x25;
        assert!(matches!(
            ParsedFrame::decode(&wire),
            Err(FrameError::BadStartMarker(0x25))
        ));
    }

    #[test]
    fn bad_end_marker_rejected() {
        let mut wire = sample_frame().encode().unwrap();
        wire[31] = b'/';
        assert!(matches!(
            ParsedFrame::decode(&wire),
            Err(FrameError::BadEndMarker(_))
        ));
    }

    #[test]
    fn short_input_rejected() {
        assert!(matches!(
            ParsedFrame::decode(&[START_MARKER; 31]),
            Err(FrameError::TooShort(31, FRAME_LEN))
        ));
    }

    #[test]
    fn encode_rejects_unrepresentable_fields() {
        let mut frame = sample_frame();
        frame.temperature = -5.0;
        assert!(matches!(
            frame.encode(),
            Err(FrameError::FieldOutOfRange {
                field: "temperature",
                ..
            })
        ));

        let mut frame = sample_frame();
        frame.dissolved_oxygen = 60.5;
        assert!(frame.encode().is_err());

        let mut frame = sample_frame();
        frame.timestamp = NaiveDate::from_ymd_opt(1999, 12, 31)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert!(matches!(
            frame.encode(),
            Err(FrameError::FieldOutOfRange { field: "year", .. })
        ));
    }

    #[test]
    fn decode_rejects_out_of_range_measurement() {
        let mut wire = sample_frame().encode().unwrap();
        // 60.50 ppm dissolved oxygen, checksum repaired so only the range
        // check can fire.
        wire[8..10].copy_from_slice(&6050u16.to_be_bytes());
        let fixed = checksum(&wire);
        wire[29..31].copy_from_slice(&fixed.to_be_bytes());
        assert!(matches!(
            ParsedFrame::decode(&wire),
            Err(FrameError::FieldOutOfRange {
                field: "dissolved oxygen",
                ..
            })
        ));
    }

    #[test]
    fn decode_rejects_impossible_calendar_date() {
        let mut wire = sample_frame().encode().unwrap();
        wire[24] = 2;
        wire[25] = 31;
        let fixed = checksum(&wire);
        wire[29..31].copy_from_slice(&fixed.to_be_bytes());
        assert!(matches!(
            ParsedFrame::decode(&wire),
            Err(FrameError::InvalidTimestamp)
        ));
    }
}
