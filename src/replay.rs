// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cyclical dataset replay.
//!
//! The replay scheduler is the bus's sole producer. On each tick it takes
//! the record at the current cursor, shifts its timestamp forward by
//! `span * cycle`, publishes it, and advances the cursor. When the cursor
//! wraps past the last record the cycle counter increments, so a finite
//! dataset replays forever as an unbounded live feed.
//!
//! # Timestamp Shift Invariant
//!
//! `span` is the dataset's time coverage plus one tick interval. Shifting
//! by `span * cycle` therefore makes every cycle's timestamps strictly
//! non-decreasing within the cycle and strictly greater than every
//! timestamp of the previous cycle: the first record of cycle `c+1` lands
//! exactly one interval after the last record of cycle `c`.
//!
//! # Determinism
//!
//! Exactly one publish per tick. Given the same records, tick interval,
//! and start time, the emitted sequence is fully determined; the cursor is
//! owned by the scheduler and never shared.

use crate::bus::EventBus;
use crate::dataset::DatasetSnapshot;
use crate::error::{Result, TelemetryError};
use crate::metrics;
use crate::record::TelemetryRecord;
use crate::task::Periodic;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

/// Replay cursor state and shift arithmetic.
///
/// Owned exclusively by the replay task; mutated only by its own ticks.
pub struct ReplayScheduler {
    records: Arc<Vec<TelemetryRecord>>,
    /// Dataset coverage plus one tick interval; the per-cycle shift unit.
    span: chrono::Duration,
    /// Resolved tick interval.
    interval: Duration,
    index: usize,
    cycle: i64,
}

impl ReplayScheduler {
    /// Create a scheduler over the loaded snapshot with a resolved tick
    /// interval.
    ///
    /// Fails if the snapshot holds no records - the caller should have
    /// treated that as fatal at load time already.
    pub fn new(snapshot: &DatasetSnapshot, interval: Duration) -> Result<Self> {
        if snapshot.is_empty() {
            return Err(TelemetryError::Internal(
                "replay scheduler created with zero records".to_string(),
            ));
        }

        let tick = chrono::Duration::from_std(interval)
            .map_err(|e| TelemetryError::Config(format!("tick interval out of range: {}", e)))?;
        let span = snapshot.span() + tick;

        Ok(Self {
            records: Arc::new(snapshot.records.clone()),
            span,
            interval,
            index: 0,
            cycle: 0,
        })
    }

    /// Number of records per cycle.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check for an empty record set (never true after construction).
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Current cursor position within the cycle.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Completed full passes through the dataset.
    pub fn cycle(&self) -> i64 {
        self.cycle
    }

    /// The resolved tick interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Produce the next record to publish and advance the cursor.
    ///
    /// The returned record is the one at the current index, time-shifted
    /// by `span * cycle`. Advancing past the last index increments the
    /// cycle counter.
    pub fn next_record(&mut self) -> TelemetryRecord {
        let base = &self.records[self.index];
        let shifted = base.with_time(base.time + self.span * self.cycle as i32);

        self.index = (self.index + 1) % self.records.len();
        if self.index == 0 {
            debug!(cycle = self.cycle, "Completed replay cycle");
            self.cycle += 1;
            metrics::record_replay_cycle(self.cycle as u64);
        }

        shifted
    }
}

/// Run the replay tick loop until shutdown.
///
/// Publishes exactly one time-shifted record per tick. Cancelled by the
/// shutdown signal; no further publishes happen after it fires.
pub async fn run_replay(
    mut scheduler: ReplayScheduler,
    bus: EventBus,
    shutdown_rx: watch::Receiver<bool>,
) {
    info!(
        records = scheduler.len(),
        interval_ms = scheduler.interval().as_millis() as u64,
        "Starting replay scheduler"
    );

    let mut timer = Periodic::new("replay", scheduler.interval(), shutdown_rx);
    while timer.tick().await {
        bus.publish(scheduler.next_record());
    }

    info!(
        cycle = scheduler.cycle(),
        index = scheduler.index(),
        "Replay scheduler stopped"
    );
}
