// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-process telemetry event bus.
//!
//! A bounded single-producer/multi-consumer multicast channel. The replay
//! scheduler publishes; the live fan-out hub and the batch sink each attach
//! an independent subscription and receive every record published after
//! they attach, in publish order.
//!
//! # Backpressure Policy
//!
//! The bus is the single backpressure control point. Publishing never
//! blocks and never surfaces an error to the producer. Each consumer path
//! buffers up to the configured capacity; when a path falls further behind
//! than that, the oldest undelivered records are dropped **for that path
//! only**, logged, and counted. Other paths are unaffected.
//!
//! `tokio::sync::broadcast` implements exactly this: the send side is
//! non-blocking, each receiver has its own cursor over a shared ring, and
//! a lagging receiver observes `RecvError::Lagged(n)` carrying the number
//! of records it missed.

use crate::metrics;
use crate::record::TelemetryRecord;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{trace, warn};

/// The telemetry multicast bus.
///
/// Cheap to clone; all clones publish into the same channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<TelemetryRecord>,
    published: Arc<AtomicU64>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` pending records per
    /// consumer path.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            published: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Publish a record to every attached consumer path.
    ///
    /// Never blocks and never fails from the producer's point of view.
    /// A record published with no consumers attached goes nowhere.
    pub fn publish(&self, record: TelemetryRecord) {
        self.published.fetch_add(1, Ordering::Relaxed);
        metrics::record_published();
        if self.tx.send(record).is_err() {
            trace!("Published with no consumers attached");
        }
    }

    /// Attach a new consumer path.
    ///
    /// The subscription sees every record published after this call.
    /// `path` labels the consumer in logs and metrics.
    pub fn subscribe(&self, path: &'static str) -> BusSubscription {
        BusSubscription {
            rx: self.tx.subscribe(),
            path,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Total records published since the bus was created.
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Number of consumer paths currently attached.
    pub fn consumer_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// One consumer path's view of the bus.
///
/// Records arrive in publish order. Records dropped under saturation are
/// counted and skipped transparently; `recv` only yields records that were
/// actually delivered to this path.
pub struct BusSubscription {
    rx: broadcast::Receiver<TelemetryRecord>,
    path: &'static str,
    dropped: Arc<AtomicU64>,
}

impl BusSubscription {
    /// Receive the next record for this path.
    ///
    /// Returns `None` once the bus is closed (all publishers dropped).
    pub async fn recv(&mut self) -> Option<TelemetryRecord> {
        loop {
            match self.rx.recv().await {
                Ok(record) => return Some(record),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    self.dropped.fetch_add(missed, Ordering::Relaxed);
                    metrics::record_bus_dropped(self.path, missed);
                    warn!(
                        path = self.path,
                        missed,
                        "Consumer path saturated, dropped events for this path"
                    );
                    // Continue from the oldest record still buffered.
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Records dropped for this path since it attached.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// The path label this subscription was attached with.
    pub fn path(&self) -> &'static str {
        self.path
    }
}
