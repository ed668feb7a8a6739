//! Shared test utilities for integration tests.
//!
//! This module provides:
//! - A recording mock storage with configurable failures
//! - Record and dataset fixture helpers

pub mod mock_storage;

pub use mock_storage::*;

use chrono::{TimeZone, Utc};
use std::io::Write;
use std::sync::Once;
use telemetry_engine::record::TelemetryRecord;

static TRACING: Once = Once::new();

/// Initialize test logging once (RUST_LOG controls verbosity).
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Build a record at minute `minute` of a fixed test day.
pub fn record(device_id: &str, minute: u32) -> TelemetryRecord {
    let time = Utc.with_ymd_and_hms(2024, 5, 1, 0, minute, 0).unwrap();
    TelemetryRecord::new(time, device_id, 0.5, 30.0)
}

/// Write a dataset CSV with the standard header plus the given rows.
pub fn dataset_file(rows: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "timestamp,device_id,energy_produced_kwh").unwrap();
    write!(file, "{}", rows).unwrap();
    file.flush().unwrap();
    file
}
