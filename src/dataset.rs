// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Historical dataset loading and normalization.
//!
//! Parses the device energy CSV into an ordered, deduplicated record set.
//!
//! # Input Format
//!
//! ```csv
//! timestamp,device_id,energy_produced_kwh
//! 01-05-2024 00:00,WT-01,0.42
//! ```
//!
//! Timestamps are `dd-MM-yyyy HH:mm`, interpreted as UTC.
//!
//! # Normalization
//!
//! - Malformed rows (missing fields, unparseable timestamp or energy,
//!   non-finite energy) are skipped with a warning.
//! - Duplicate `(time, device_id)` rows are merged by summing their energy.
//! - Power is derived from per-minute energy: `power_kw = energy_kwh * 60`.
//! - Records are sorted by `(time, device_id)` and unique by that key.
//!
//! A dataset that yields zero usable records is a fatal error: the replay
//! scheduler cannot start without records.

use crate::error::{Result, TelemetryError};
use crate::record::TelemetryRecord;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

/// Timestamp format used by the source dataset.
pub const TIMESTAMP_FORMAT: &str = "%d-%m-%Y %H:%M";

/// Minutes per reading window; converts per-minute energy (kWh) to power (kW).
const MINUTES_PER_HOUR: f64 = 60.0;

/// Raw CSV row before validation. All fields optional so a partially
/// filled row deserializes and can be rejected with context.
#[derive(Debug, Deserialize)]
struct RawRow {
    timestamp: Option<String>,
    device_id: Option<String>,
    energy_produced_kwh: Option<f64>,
}

/// The loaded dataset: ordered records plus the time span they cover.
///
/// Immutable once loaded. The span drives the replay scheduler's
/// cycle-shift arithmetic.
#[derive(Debug, Clone)]
pub struct DatasetSnapshot {
    /// Normalized records, sorted by `(time, device_id)`, unique by that key.
    pub records: Vec<TelemetryRecord>,
    /// Timestamp of the first record.
    pub start: DateTime<Utc>,
    /// Timestamp of the last record.
    pub end: DateTime<Utc>,
    /// Number of data rows in the source file, including discarded ones.
    pub raw_rows: usize,
}

impl DatasetSnapshot {
    /// Number of normalized records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if the snapshot holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Time covered by the records, first to last.
    pub fn span(&self) -> chrono::Duration {
        self.end - self.start
    }
}

/// Parse a dataset timestamp (`dd-MM-yyyy HH:mm`, UTC).
///
/// Returns `None` for malformed input.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw.trim(), TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Load and normalize the dataset at `path`.
///
/// Fails with [`TelemetryError::Dataset`] if the file is missing,
/// unreadable, or yields zero valid records after discarding malformed rows.
pub fn load_dataset(path: impl AsRef<Path>) -> Result<DatasetSnapshot> {
    let path = path.as_ref();
    let path_str = path.display().to_string();

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| TelemetryError::dataset(&path_str, format!("failed to open: {}", e)))?;

    // BTreeMap gives us (time, device_id) ordering and dedup in one pass.
    let mut accumulator: BTreeMap<(DateTime<Utc>, String), f64> = BTreeMap::new();
    let mut raw_rows = 0usize;

    for result in reader.deserialize::<RawRow>() {
        raw_rows += 1;
        let row = match result {
            Ok(row) => row,
            Err(e) => {
                warn!(row = raw_rows, error = %e, "Skipping unparseable row");
                continue;
            }
        };

        let (Some(raw_time), Some(raw_device), Some(energy)) =
            (row.timestamp, row.device_id, row.energy_produced_kwh)
        else {
            warn!(row = raw_rows, "Skipping row with missing fields");
            continue;
        };

        let Some(time) = parse_timestamp(&raw_time) else {
            warn!(row = raw_rows, timestamp = %raw_time, "Skipping row with malformed timestamp");
            continue;
        };

        let device_id = raw_device.trim().to_string();
        if device_id.is_empty() {
            warn!(row = raw_rows, "Skipping row with blank device id");
            continue;
        }

        if !energy.is_finite() {
            warn!(
                row = raw_rows,
                device_id = %device_id,
                energy,
                "Skipping row with non-finite energy"
            );
            continue;
        }

        *accumulator.entry((time, device_id)).or_insert(0.0) += energy;
    }

    if accumulator.is_empty() {
        return Err(TelemetryError::dataset(
            &path_str,
            format!("produced no telemetry rows ({} raw rows discarded)", raw_rows),
        ));
    }

    let records: Vec<TelemetryRecord> = accumulator
        .into_iter()
        .map(|((time, device_id), energy)| {
            TelemetryRecord::new(time, device_id, energy, energy * MINUTES_PER_HOUR)
        })
        .collect();

    // Non-empty was just checked; first/last exist.
    let start = records[0].time;
    let end = records[records.len() - 1].time;

    crate::metrics::record_dataset_loaded(raw_rows, records.len());
    info!(
        path = %path_str,
        raw_rows,
        normalized_rows = records.len(),
        "Loaded dataset"
    );

    Ok(DatasetSnapshot {
        records,
        start,
        end,
        raw_rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_csv(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_parse_timestamp() {
        let time = parse_timestamp("01-05-2024 12:30").unwrap();
        assert_eq!(time.to_rfc3339(), "2024-05-01T12:30:00+00:00");
    }

    #[test]
    fn test_parse_timestamp_trims_whitespace() {
        assert!(parse_timestamp("  01-05-2024 12:30  ").is_some());
    }

    #[test]
    fn test_parse_timestamp_malformed() {
        assert!(parse_timestamp("2024-05-01T12:30:00Z").is_none());
        assert!(parse_timestamp("01-05-2024").is_none());
        assert!(parse_timestamp("").is_none());
        assert!(parse_timestamp("32-13-2024 99:99").is_none());
    }

    #[test]
    fn test_load_dataset_basic() {
        let file = write_csv(
            "timestamp,device_id,energy_produced_kwh\n\
             01-05-2024 00:00,WT-01,0.5\n\
             01-05-2024 00:01,WT-01,0.6\n\
             01-05-2024 00:00,WT-02,0.7\n",
        );

        let snapshot = load_dataset(file.path()).unwrap();
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot.raw_rows, 3);

        // Sorted by (time, device_id)
        assert_eq!(snapshot.records[0].device_id, "WT-01");
        assert_eq!(snapshot.records[1].device_id, "WT-02");
        assert_eq!(snapshot.records[2].device_id, "WT-01");
        assert_eq!(snapshot.records[0].time, snapshot.start);
        assert_eq!(snapshot.records[2].time, snapshot.end);
        assert_eq!(snapshot.span(), chrono::Duration::minutes(1));
    }

    #[test]
    fn test_load_dataset_derives_power() {
        let file = write_csv(
            "timestamp,device_id,energy_produced_kwh\n\
             01-05-2024 00:00,WT-01,1.5\n",
        );

        let snapshot = load_dataset(file.path()).unwrap();
        assert_eq!(snapshot.records[0].energy_kwh, 1.5);
        assert_eq!(snapshot.records[0].power_kw, 90.0);
    }

    #[test]
    fn test_load_dataset_merges_duplicate_keys() {
        let file = write_csv(
            "timestamp,device_id,energy_produced_kwh\n\
             01-05-2024 00:00,WT-01,0.5\n\
             01-05-2024 00:00,WT-01,0.25\n",
        );

        let snapshot = load_dataset(file.path()).unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.raw_rows, 2);
        assert_eq!(snapshot.records[0].energy_kwh, 0.75);
        assert_eq!(snapshot.records[0].power_kw, 45.0);
    }

    #[test]
    fn test_load_dataset_skips_malformed_rows() {
        let file = write_csv(
            "timestamp,device_id,energy_produced_kwh\n\
             not-a-date,WT-01,0.5\n\
             01-05-2024 00:00,,0.5\n\
             01-05-2024 00:01,WT-01,NaN\n\
             01-05-2024 00:02,WT-01,0.5\n",
        );

        let snapshot = load_dataset(file.path()).unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.raw_rows, 4);
        assert_eq!(snapshot.records[0].device_id, "WT-01");
        assert_eq!(snapshot.records[0].energy_kwh, 0.5);
    }

    #[test]
    fn test_load_dataset_missing_file() {
        let err = load_dataset("/nonexistent/dataset.csv").unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("/nonexistent/dataset.csv"));
    }

    #[test]
    fn test_load_dataset_all_rows_malformed_is_fatal() {
        let file = write_csv(
            "timestamp,device_id,energy_produced_kwh\n\
             garbage,,\n\
             also-garbage,WT-01,not-a-number\n",
        );

        let err = load_dataset(file.path()).unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("no telemetry rows"));
    }

    #[test]
    fn test_load_dataset_header_only_is_fatal() {
        let file = write_csv("timestamp,device_id,energy_produced_kwh\n");
        assert!(load_dataset(file.path()).is_err());
    }

    #[test]
    fn test_load_dataset_single_record_span_is_zero() {
        let file = write_csv(
            "timestamp,device_id,energy_produced_kwh\n\
             01-05-2024 00:00,WT-01,0.5\n",
        );

        let snapshot = load_dataset(file.path()).unwrap();
        assert_eq!(snapshot.span(), chrono::Duration::zero());
        assert_eq!(snapshot.start, snapshot.end);
    }
}
