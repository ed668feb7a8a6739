//! The telemetry record value type.
//!
//! A [`TelemetryRecord`] is one normalized reading from one device:
//! the energy produced over a one-minute window and the corresponding
//! instantaneous power. Records are immutable values, uniquely identified
//! by `(time, device_id)` after normalization.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One device energy reading.
///
/// Serializes with camelCase field names to match the wire shape consumed
/// by streaming clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryRecord {
    /// Reading timestamp (UTC, minute resolution in the source dataset).
    pub time: DateTime<Utc>,
    /// Device identifier.
    pub device_id: String,
    /// Energy produced in the reading window (kWh).
    pub energy_kwh: f64,
    /// Instantaneous power (kW), derived from per-minute energy.
    pub power_kw: f64,
}

impl TelemetryRecord {
    /// Create a record.
    pub fn new(
        time: DateTime<Utc>,
        device_id: impl Into<String>,
        energy_kwh: f64,
        power_kw: f64,
    ) -> Self {
        Self {
            time,
            device_id: device_id.into(),
            energy_kwh,
            power_kw,
        }
    }

    /// Copy of this record with a different timestamp.
    ///
    /// Used by the replay scheduler to shift historical records into the
    /// synthetic present.
    pub fn with_time(&self, time: DateTime<Utc>) -> Self {
        Self {
            time,
            device_id: self.device_id.clone(),
            energy_kwh: self.energy_kwh,
            power_kw: self.power_kw,
        }
    }

    /// The record's unique key: `(time, device_id)`.
    pub fn key(&self) -> (DateTime<Utc>, &str) {
        (self.time, &self.device_id)
    }
}
