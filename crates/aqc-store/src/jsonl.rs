//! ---
//! aqc_section: "04-persistence-registry"
//! aqc_subsection: "module"
//! aqc_type: "source"
//! aqc_scope: "code"
//! aqc_description: "Persistence and sensor-registry collaborator contracts."
//! aqc_version: "v0.0.0-prealpha"
//! aqc_owner: "tbd"
//! ---
//! Append-only JSON-lines reading store used by the standalone daemon.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use aqc_proto::ParsedFrame;
use parking_lot::Mutex;
use tracing::debug;

use crate::{fan_out, ReadingStore, Result};

/// One JSON object per line, three lines per decoded frame.
pub struct JsonlStore {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl JsonlStore {
    /// Open the store for appending, creating parent directories as needed.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        debug!(path = %path.display(), "opened readings store");
        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    /// Path the store appends to.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ReadingStore for JsonlStore {
    fn insert_reading(&self, frame: &ParsedFrame) -> Result<()> {
        let mut writer = self.writer.lock();
        for row in fan_out(frame) {
            let line = serde_json::to_string(&row)?;
            writer.write_all(line.as_bytes())?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ReadingRow;
    use aqc_proto::SensorFrame;
    use chrono::NaiveDate;

    fn parsed() -> ParsedFrame {
        let frame = SensorFrame {
            sensor_id: 7,
            payload_len: 32,
            temperature: 19.0,
            dissolved_oxygen: 8.5,
            water_temperature: 17.5,
            latitude: -33.86,
            longitude: 151.21,
            timestamp: NaiveDate::from_ymd_opt(2025, 1, 2)
                .unwrap()
                .and_hms_opt(3, 4, 5)
                .unwrap(),
        };
        ParsedFrame::decode(&frame.encode().unwrap()).unwrap()
    }

    #[test]
    fn appends_three_rows_per_reading() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/readings.jsonl");

        let store = JsonlStore::open(&path).unwrap();
        store.insert_reading(&parsed()).unwrap();
        drop(store);

        // Reopening appends instead of truncating.
        let store = JsonlStore::open(&path).unwrap();
        store.insert_reading(&parsed()).unwrap();
        drop(store);

        let contents = std::fs::read_to_string(&path).unwrap();
        let rows: Vec<ReadingRow> = contents
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(rows.len(), 6);
        assert_eq!(rows[0].value_type_id, 1);
        assert_eq!(rows[2].value_type_id, 3);
        assert_eq!(rows[4].measured_at, "2025-01-02 03:04:05");
    }
}
