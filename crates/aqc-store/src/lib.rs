//! ---
//! aqc_section: "04-persistence-registry"
//! aqc_subsection: "module"
//! aqc_type: "source"
//! aqc_scope: "code"
//! aqc_description: "Persistence and sensor-registry collaborator contracts."
//! aqc_version: "v0.0.0-prealpha"
//! aqc_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Collaborator contracts between the ingestion server and its storage layer.
//!
//! The relational store itself is external to this workspace; the server only
//! ever calls the two operations modeled here: insert a decoded reading and
//! list the registered sensor IDs. One decoded frame fans out into three
//! logical rows (temperature, dissolved oxygen, water temperature) sharing a
//! single location string and timestamp.

use std::collections::HashSet;

use aqc_proto::ParsedFrame;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

pub mod jsonl;

pub use jsonl::JsonlStore;

/// Shared result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors surfaced by the storage collaborators.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Underlying IO failure while writing rows.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Row serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// The backing store could not be consulted at all.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Measurement kind of a persisted row, with its relational type ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    /// Air temperature, type ID 1.
    Temperature,
    /// Dissolved oxygen, type ID 2.
    DissolvedOxygen,
    /// Water temperature, type ID 3.
    WaterTemperature,
}

impl ValueType {
    /// Relational `value_type_id` for this measurement kind.
    pub fn id(self) -> u8 {
        match self {
            ValueType::Temperature => 1,
            ValueType::DissolvedOxygen => 2,
            ValueType::WaterTemperature => 3,
        }
    }
}

/// One logical persistence row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadingRow {
    /// Originating sensor.
    pub sensor_id: u16,
    /// Measurement kind.
    pub value_type: ValueType,
    /// Relational type ID, duplicated for flat consumers.
    pub value_type_id: u8,
    /// Measured value in the kind's natural unit.
    pub sensor_value: f64,
    /// `lat,lon` with six decimal places.
    pub location: String,
    /// `YYYY-MM-DD HH:MM:SS`.
    pub measured_at: String,
}

/// Fan a decoded frame out into its three persistence rows.
pub fn fan_out(frame: &ParsedFrame) -> [ReadingRow; 3] {
    let location = frame.location_string();
    let measured_at = frame.timestamp_string();
    let row = |value_type: ValueType, sensor_value: f64| ReadingRow {
        sensor_id: frame.sensor_id,
        value_type,
        value_type_id: value_type.id(),
        sensor_value,
        location: location.clone(),
        measured_at: measured_at.clone(),
    };
    [
        row(ValueType::Temperature, frame.temperature),
        row(ValueType::DissolvedOxygen, frame.dissolved_oxygen),
        row(ValueType::WaterTemperature, frame.water_temperature),
    ]
}

/// Read-only view of the sensor registration table.
pub trait SensorRegistry: Send + Sync {
    /// IDs currently admitted by the system.
    fn registered_ids(&self) -> Result<HashSet<u16>>;
}

/// Sink for decoded readings; one call persists all three rows.
pub trait ReadingStore: Send + Sync {
    /// Persist the fan-out of one frame.
    fn insert_reading(&self, frame: &ParsedFrame) -> Result<()>;
}

/// Fixed registry backed by a configured ID list.
#[derive(Debug, Clone, Default)]
pub struct StaticRegistry {
    ids: HashSet<u16>,
}

impl StaticRegistry {
    /// Build a registry admitting exactly `ids`.
    pub fn new<I: IntoIterator<Item = u16>>(ids: I) -> Self {
        Self {
            ids: ids.into_iter().collect(),
        }
    }
}

impl SensorRegistry for StaticRegistry {
    fn registered_ids(&self) -> Result<HashSet<u16>> {
        Ok(self.ids.clone())
    }
}

/// In-memory store for tests and single-process integration.
#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: Mutex<Vec<ReadingRow>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything persisted so far.
    pub fn rows(&self) -> Vec<ReadingRow> {
        self.rows.lock().clone()
    }

    /// Number of persisted rows.
    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    /// Whether nothing has been persisted.
    pub fn is_empty(&self) -> bool {
        self.rows.lock().is_empty()
    }
}

impl ReadingStore for MemoryStore {
    fn insert_reading(&self, frame: &ParsedFrame) -> Result<()> {
        self.rows.lock().extend(fan_out(frame));
        Ok(())
    }
}
