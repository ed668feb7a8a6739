// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Durable batch sink.
//!
//! Consumes the bus on a dedicated sequential path, accumulates events
//! into windows bounded by count and time, and flushes each window to the
//! [`Storage`] collaborator via an idempotent upsert.
//!
//! # Window Semantics
//!
//! A window flushes when either bound is hit, whichever first:
//! - the buffer reaches `batch_size`, or
//! - `flush_interval` elapses since the first buffered record.
//!
//! Empty windows never flush. Flushed windows are disjoint and cover
//! every event the sink received, in arrival order; the window resets
//! immediately after each flush and its deadline is recomputed from the
//! next record's arrival.
//!
//! # Failure Policy
//!
//! A failed upsert is retried with exponential backoff
//! ([`RetryConfig::sink`]). If every attempt fails, the sink logs at
//! error level and halts its bus consumption permanently - it does not
//! buffer unboundedly against a dead store, and the rest of the engine
//! (replay, live fan-out) keeps running. On shutdown the pending window
//! is flushed before the task exits.

use crate::bus::BusSubscription;
use crate::config::SinkConfig;
use crate::metrics;
use crate::record::TelemetryRecord;
use crate::resilience::RetryConfig;
use crate::storage::Storage;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

/// One accumulation window.
///
/// Owned by the sink task; the deadline is anchored to the first buffered
/// record's arrival and cleared on every flush.
#[derive(Default)]
pub struct BatchWindow {
    buffer: Vec<TelemetryRecord>,
    opened_at: Option<Instant>,
}

impl BatchWindow {
    /// Append a record, opening the window if it was empty.
    pub fn push(&mut self, record: TelemetryRecord) {
        if self.buffer.is_empty() {
            self.opened_at = Some(Instant::now());
        }
        self.buffer.push(record);
    }

    /// Number of buffered records.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the window is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// When this window must flush, or `None` while empty.
    pub fn deadline(&self, flush_interval: Duration) -> Option<Instant> {
        self.opened_at.map(|opened| opened + flush_interval)
    }

    /// Take the buffered records, resetting the window.
    pub fn take(&mut self) -> Vec<TelemetryRecord> {
        self.opened_at = None;
        std::mem::take(&mut self.buffer)
    }
}

/// Flush a window through the store with bounded retries.
///
/// Returns `Err` only after every attempt failed; the batch is lost and
/// the caller must treat the sink as halted.
async fn flush_window<S: Storage>(
    storage: &Arc<S>,
    window: &mut BatchWindow,
    retry: &RetryConfig,
) -> Result<(), String> {
    if window.is_empty() {
        return Ok(());
    }

    let batch = window.take();
    let size = batch.len();
    let started = Instant::now();

    let mut attempt = 0usize;
    loop {
        attempt += 1;
        match storage.upsert(batch.clone()).await {
            Ok(written) => {
                metrics::record_batch_flush(written, started.elapsed());
                debug!(size, written, attempt, "Flushed batch window");
                return Ok(());
            }
            Err(e) if attempt < retry.max_attempts => {
                let delay = retry.delay_for_attempt(attempt);
                metrics::record_flush_retry();
                warn!(
                    size,
                    attempt,
                    max_attempts = retry.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Batch flush failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                metrics::record_flush_error();
                return Err(format!(
                    "flush of {} records failed after {} attempts: {}",
                    size, attempt, e
                ));
            }
        }
    }
}

/// Run the batch sink until shutdown or a terminal flush failure.
///
/// Single logical consumer: flush order matches arrival order.
pub async fn run_sink<S: Storage>(
    storage: Arc<S>,
    mut bus_sub: BusSubscription,
    config: SinkConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let flush_interval = config.flush_interval_duration();
    let retry = RetryConfig::sink();
    let mut window = BatchWindow::default();

    info!(
        batch_size = config.batch_size,
        flush_interval_ms = flush_interval.as_millis() as u64,
        "Starting batch sink"
    );

    loop {
        let deadline = window.deadline(flush_interval);

        tokio::select! {
            biased;

            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    // Drain the pending window before exiting.
                    if let Err(e) = flush_window(&storage, &mut window, &retry).await {
                        error!(error = %e, "Final flush failed during shutdown");
                    }
                    break;
                }
            }

            _ = async { sleep_until(deadline.unwrap_or_else(Instant::now)).await },
                if deadline.is_some() =>
            {
                if let Err(e) = flush_window(&storage, &mut window, &retry).await {
                    error!(error = %e, "Batch sink halting after terminal flush failure");
                    return;
                }
            }

            record = bus_sub.recv() => {
                match record {
                    Some(record) => {
                        window.push(record);
                        if window.len() >= config.batch_size {
                            if let Err(e) = flush_window(&storage, &mut window, &retry).await {
                                error!(error = %e, "Batch sink halting after terminal flush failure");
                                return;
                            }
                        }
                    }
                    None => {
                        // Bus closed; drain and exit.
                        if let Err(e) = flush_window(&storage, &mut window, &retry).await {
                            error!(error = %e, "Final flush failed after bus close");
                        }
                        break;
                    }
                }
            }
        }
    }

    info!(dropped = bus_sub.dropped(), "Batch sink stopped");
}
