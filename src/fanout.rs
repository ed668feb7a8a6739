// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Live fan-out hub.
//!
//! Re-broadcasts every bus event to a dynamic registry of live subscriber
//! connections, each optionally filtered to one device. An independent
//! heartbeat timer prunes dead connections.
//!
//! # Connection Lifecycle
//!
//! ```text
//!               register()
//!                   │
//!                   ▼
//!                Active ──────────────┐
//!                   │                 │ delivery failure,
//!     client drops  │                 │ heartbeat failure,
//!     subscription  │                 │ engine shutdown
//!                   ▼                 ▼
//!                Closing ─────────▶ Closed (removed from registry)
//! ```
//!
//! Removal is the only terminal transition and is triggered uniformly
//! from delivery failure, heartbeat failure, explicit close, and engine
//! shutdown. A removed subscriber is never reinstated; no retry and no
//! closing handshake is attempted on an already-failed connection.
//!
//! # Concurrency
//!
//! The registry is mutated concurrently by the broadcast path, the
//! heartbeat path, and registration/removal calls. Broadcast takes a
//! snapshot of the live senders under a read lock, delivers outside the
//! lock, and removes failed entries afterwards under a write lock - no
//! lock is held across a send, and iteration never skips or double-visits
//! an entry.
//!
//! Delivery is per-subscriber over a bounded frame queue. A subscriber
//! that cannot drain its queue is indistinguishable from a hung
//! connection and is removed; the bus, not these queues, is the pipeline's
//! backpressure point.

use crate::bus::BusSubscription;
use crate::metrics;
use crate::record::TelemetryRecord;
use crate::task::Periodic;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, RwLock};
use tracing::{debug, info, trace};

/// Unique handle for a registered subscriber.
pub type SubscriberId = u64;

/// One frame on a subscriber's stream.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(tag = "event", content = "data", rename_all = "lowercase")]
pub enum StreamFrame {
    /// Sent once, immediately on registration.
    Connected,
    /// One delivered telemetry event.
    Telemetry(TelemetryRecord),
    /// Periodic keep-alive, no payload.
    Heartbeat,
}

impl StreamFrame {
    /// Client-side resumption/ordering id: the record timestamp for
    /// telemetry frames, nothing for the others.
    pub fn event_id(&self) -> Option<String> {
        match self {
            StreamFrame::Telemetry(record) => Some(record.time.to_rfc3339()),
            _ => None,
        }
    }
}

/// Why a subscriber left the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    /// A telemetry frame could not be delivered.
    SendFailure,
    /// The keep-alive could not be delivered.
    HeartbeatFailure,
    /// The client closed its subscription.
    ClientClosed,
    /// Engine shutdown force-closed the connection.
    Shutdown,
}

impl RemovalReason {
    fn as_str(&self) -> &'static str {
        match self {
            Self::SendFailure => "send_failure",
            Self::HeartbeatFailure => "heartbeat_failure",
            Self::ClientClosed => "client_closed",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionState {
    Active,
    Closing,
    Closed,
}

/// Registry entry for one live subscriber.
struct SubscriberEntry {
    tx: mpsc::Sender<StreamFrame>,
    /// Device filter fixed at registration; immutable for the
    /// subscriber's lifetime.
    filter: Option<String>,
    state: ConnectionState,
}

impl SubscriberEntry {
    fn matches(&self, record: &TelemetryRecord) -> bool {
        match &self.filter {
            Some(device_id) => device_id == &record.device_id,
            None => true,
        }
    }
}

/// A registered subscriber's receiving end.
///
/// Dropping the subscription closes the connection; the hub notices on
/// its next delivery attempt (or heartbeat) and removes the entry.
pub struct Subscription {
    id: SubscriberId,
    rx: mpsc::Receiver<StreamFrame>,
}

impl Subscription {
    /// This subscriber's registry handle.
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Receive the next frame.
    ///
    /// Returns `None` once the hub has removed this subscriber (or shut
    /// down).
    pub async fn recv(&mut self) -> Option<StreamFrame> {
        self.rx.recv().await
    }
}

/// The live fan-out hub.
///
/// Owns the subscriber registry. The broadcast and heartbeat loops run as
/// separate tasks ([`run_broadcast`], [`run_heartbeat`]) sharing the hub
/// through an `Arc`.
pub struct FanoutHub {
    subscribers: RwLock<HashMap<SubscriberId, SubscriberEntry>>,
    next_id: AtomicU64,
    queue_capacity: usize,
}

impl FanoutHub {
    /// Create a hub whose subscribers each buffer up to `queue_capacity`
    /// undelivered frames.
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Register a new live subscriber, optionally filtered to one device.
    ///
    /// A blank filter is treated as no filter. The subscriber receives an
    /// immediate `connected` acknowledgment. Registration never blocks on
    /// bus state.
    pub async fn register(&self, filter: Option<String>) -> Subscription {
        let filter = filter
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty());

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.queue_capacity);

        // The queue is fresh, so the acknowledgment cannot fail here.
        let _ = tx.try_send(StreamFrame::Connected);

        let count = {
            let mut subscribers = self.subscribers.write().await;
            subscribers.insert(
                id,
                SubscriberEntry {
                    tx,
                    filter: filter.clone(),
                    state: ConnectionState::Active,
                },
            );
            subscribers.len()
        };

        metrics::record_subscriber_registered(filter.is_some());
        metrics::set_live_subscribers(count);
        debug!(subscriber = id, filter = ?filter, total = count, "Registered live subscriber");

        Subscription { id, rx }
    }

    /// Explicitly close a subscriber.
    ///
    /// Idempotent: closing an already-removed subscriber is a no-op.
    pub async fn unregister(&self, id: SubscriberId) {
        self.remove(&[id], RemovalReason::ClientClosed).await;
    }

    /// Deliver one record to every live subscriber whose filter matches.
    ///
    /// Subscribers that fail delivery are removed immediately.
    pub async fn broadcast(&self, record: &TelemetryRecord) {
        // Snapshot the matching senders; never hold the lock across a send.
        let targets: Vec<(SubscriberId, mpsc::Sender<StreamFrame>)> = {
            let subscribers = self.subscribers.read().await;
            subscribers
                .iter()
                .filter(|(_, entry)| entry.state == ConnectionState::Active)
                .filter(|(_, entry)| entry.matches(record))
                .map(|(id, entry)| (*id, entry.tx.clone()))
                .collect()
        };

        let mut delivered = 0usize;
        let mut failed = Vec::new();
        for (id, tx) in targets {
            match tx.try_send(StreamFrame::Telemetry(record.clone())) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    trace!(subscriber = id, error = %e, "Telemetry delivery failed");
                    failed.push(id);
                }
            }
        }

        metrics::record_frames_delivered(delivered);
        if !failed.is_empty() {
            self.remove(&failed, RemovalReason::SendFailure).await;
        }
    }

    /// Send a keep-alive to every live subscriber, pruning the dead.
    pub async fn send_heartbeats(&self) {
        let targets: Vec<(SubscriberId, mpsc::Sender<StreamFrame>)> = {
            let subscribers = self.subscribers.read().await;
            subscribers
                .iter()
                .filter(|(_, entry)| entry.state == ConnectionState::Active)
                .map(|(id, entry)| (*id, entry.tx.clone()))
                .collect()
        };

        let mut sent = 0usize;
        let mut failed = Vec::new();
        for (id, tx) in targets {
            match tx.try_send(StreamFrame::Heartbeat) {
                Ok(()) => sent += 1,
                Err(e) => {
                    trace!(subscriber = id, error = %e, "Heartbeat delivery failed");
                    failed.push(id);
                }
            }
        }

        let removed = failed.len();
        if !failed.is_empty() {
            self.remove(&failed, RemovalReason::HeartbeatFailure).await;
        }
        metrics::record_heartbeat(sent, removed);
    }

    /// Force-close every remaining subscriber (engine shutdown).
    pub async fn close_all(&self) {
        let ids: Vec<SubscriberId> = self.subscribers.read().await.keys().copied().collect();
        if !ids.is_empty() {
            info!(count = ids.len(), "Closing all live subscribers");
            self.remove(&ids, RemovalReason::Shutdown).await;
        }
    }

    /// Number of live subscribers.
    pub async fn connection_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    /// Remove subscribers, walking each through Closing to Closed.
    ///
    /// Dropping the entry's sender wakes the client's `recv()` with
    /// `None`. No further frames are ever attempted on a removed
    /// subscriber.
    async fn remove(&self, ids: &[SubscriberId], reason: RemovalReason) {
        let mut subscribers = self.subscribers.write().await;
        for &id in ids {
            let Some(entry) = subscribers.get_mut(&id) else {
                // Already removed by a concurrent path.
                continue;
            };
            if entry.state != ConnectionState::Active {
                continue;
            }
            entry.state = ConnectionState::Closing;
            if let Some(mut entry) = subscribers.remove(&id) {
                entry.state = ConnectionState::Closed;
            }

            metrics::record_subscriber_removed(reason.as_str());
            debug!(subscriber = id, reason = reason.as_str(), "Removed live subscriber");
        }
        metrics::set_live_subscribers(subscribers.len());
    }
}

/// Run the hub's bus consumption loop until shutdown.
///
/// Fully decoupled from the producer and from the batch sink; each bus
/// event is fanned out to the matching subscribers.
pub async fn run_broadcast(
    hub: Arc<FanoutHub>,
    mut bus_sub: BusSubscription,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    info!("Starting live fan-out");

    loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }

            record = bus_sub.recv() => {
                match record {
                    Some(record) => hub.broadcast(&record).await,
                    None => break, // bus closed
                }
            }
        }
    }

    info!(dropped = bus_sub.dropped(), "Live fan-out stopped");
}

/// Run the heartbeat loop until shutdown.
///
/// Independent of the broadcast path, so subscribers are pruned even when
/// no telemetry is flowing.
pub async fn run_heartbeat(
    hub: Arc<FanoutHub>,
    period: Duration,
    shutdown_rx: watch::Receiver<bool>,
) {
    let mut timer = Periodic::new("heartbeat", period, shutdown_rx);
    // Skip the interval's immediate first fire; a heartbeat at t=0 is noise.
    if !timer.tick().await {
        return;
    }
    while timer.tick().await {
        hub.send_heartbeats().await;
    }
    debug!("Heartbeat loop stopped");
}
