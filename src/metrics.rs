//! Metrics for observability.
//!
//! Exports Prometheus-compatible metrics for:
//! - Replay publishing and cycle progress
//! - Per-path bus drops (the backpressure escape valve)
//! - Live subscriber registrations, removals, and population
//! - Batch sink flushes and storage errors
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `telemetry_` and follow Prometheus
//! conventions: counters end in `_total`, gauges represent current state,
//! histograms track distributions (duration, size).
//!
//! # Usage
//!
//! ```rust,no_run
//! use telemetry_engine::metrics;
//! use std::time::Duration;
//!
//! // In the sink after a flush
//! metrics::record_batch_flush(500, Duration::from_millis(12));
//! ```

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Record one published replay event.
pub fn record_published() {
    counter!("telemetry_published_total").increment(1);
}

/// Record events dropped for a saturated consumer path.
pub fn record_bus_dropped(path: &'static str, count: u64) {
    counter!("telemetry_bus_dropped_total", "path" => path).increment(count);
}

/// Gauge for the current replay cycle.
pub fn record_replay_cycle(cycle: u64) {
    gauge!("telemetry_replay_cycle").set(cycle as f64);
}

/// Record a dataset load.
pub fn record_dataset_loaded(raw_rows: usize, normalized_rows: usize) {
    gauge!("telemetry_dataset_raw_rows").set(raw_rows as f64);
    gauge!("telemetry_dataset_rows").set(normalized_rows as f64);
}

/// Record a subscriber registration.
pub fn record_subscriber_registered(filtered: bool) {
    let kind = if filtered { "filtered" } else { "all" };
    counter!("telemetry_subscribers_registered_total", "kind" => kind).increment(1);
}

/// Record a subscriber removal by reason.
pub fn record_subscriber_removed(reason: &'static str) {
    counter!("telemetry_subscribers_removed_total", "reason" => reason).increment(1);
}

/// Gauge for the live subscriber population.
pub fn set_live_subscribers(count: usize) {
    gauge!("telemetry_live_subscribers").set(count as f64);
}

/// Record frames delivered to live subscribers.
pub fn record_frames_delivered(count: usize) {
    if count > 0 {
        counter!("telemetry_frames_delivered_total").increment(count as u64);
    }
}

/// Record a heartbeat pass over the registry.
pub fn record_heartbeat(sent: usize, removed: usize) {
    counter!("telemetry_heartbeats_sent_total").increment(sent as u64);
    if removed > 0 {
        counter!("telemetry_heartbeat_removals_total").increment(removed as u64);
    }
}

/// Record a successful batch flush.
pub fn record_batch_flush(size: usize, duration: Duration) {
    counter!("telemetry_batch_flushes_total").increment(1);
    counter!("telemetry_rows_upserted_total").increment(size as u64);
    histogram!("telemetry_batch_size").record(size as f64);
    histogram!("telemetry_batch_flush_duration_seconds").record(duration.as_secs_f64());
}

/// Record a failed flush attempt (before retries are exhausted).
pub fn record_flush_retry() {
    counter!("telemetry_flush_retries_total").increment(1);
}

/// Record a terminal flush failure (sink halts).
pub fn record_flush_error() {
    counter!("telemetry_flush_errors_total").increment(1);
}

/// Gauge for engine state.
pub fn set_engine_state(state: &str) {
    // Encode state as numeric for alerting (0=created ... 5=failed)
    let value = match state {
        "Created" => 0.0,
        "Loading" => 1.0,
        "Running" => 2.0,
        "ShuttingDown" => 3.0,
        "Stopped" => 4.0,
        "Failed" => 5.0,
        _ => -1.0,
    };
    gauge!("telemetry_engine_state").set(value);
}
