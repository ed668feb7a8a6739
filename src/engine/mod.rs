// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Telemetry engine coordinator.
//!
//! The main orchestrator that ties together:
//! - Dataset loading via [`crate::dataset`]
//! - Cyclical replay via [`crate::replay::ReplayScheduler`]
//! - Live fan-out via [`crate::fanout::FanoutHub`]
//! - Durable batching via [`crate::sink`]
//!
//! # Architecture
//!
//! The coordinator manages the full pipeline lifecycle:
//! 1. Loads and normalizes the historical dataset (fatal if empty)
//! 2. Attaches the fan-out and sink consumer paths to the bus
//! 3. Starts the replay tick loop as the sole producer
//! 4. Handles graceful shutdown with sink draining and subscriber closing
//!
//! Consumers attach before the producer starts, so the first published
//! record is observable on every path. Each consumer runs on its own task,
//! fully decoupled from the producer and from each other.

mod types;

pub use types::{EngineHealth, EngineState};

use crate::bus::EventBus;
use crate::config::EngineConfig;
use crate::dataset;
use crate::error::{Result, TelemetryError};
use crate::fanout::{self, FanoutHub, Subscription};
use crate::metrics;
use crate::replay::{self, ReplayScheduler};
use crate::sink;
use crate::storage::{MemoryStorage, Storage};
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tracing::{debug, error, info, warn};

/// The main telemetry engine.
///
/// Owns the bus, the fan-out hub, and the handles of every spawned task.
/// Generic over the durable [`Storage`] backend; defaults to
/// [`MemoryStorage`] for tests and standalone use.
pub struct TelemetryEngine<S: Storage = MemoryStorage> {
    config: EngineConfig,

    /// Engine state (broadcast to watchers)
    state_tx: watch::Sender<EngineState>,
    state_rx: watch::Receiver<EngineState>,

    /// Durable store the batch sink flushes into
    storage: Arc<S>,

    /// The multicast bus connecting producer and consumers
    bus: EventBus,

    /// Live subscriber registry
    hub: Arc<FanoutHub>,

    /// Shutdown signal
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,

    /// Spawned task handles (replay, broadcast, heartbeat, sink)
    task_handles: RwLock<Vec<tokio::task::JoinHandle<()>>>,

    /// Records per replay cycle, set once the dataset loads
    dataset_records: usize,
}

impl TelemetryEngine<MemoryStorage> {
    /// Create an engine with in-memory storage (testing/standalone).
    ///
    /// The engine starts in `Created` state. Call [`start()`](Self::start)
    /// to load the dataset and begin the pipeline.
    pub fn new(config: EngineConfig) -> Self {
        Self::with_storage(config, Arc::new(MemoryStorage::new()))
    }
}

impl<S: Storage> TelemetryEngine<S> {
    /// Create an engine flushing into the given durable store.
    ///
    /// This is the primary constructor used by the serving layer.
    pub fn with_storage(config: EngineConfig, storage: Arc<S>) -> Self {
        let (state_tx, state_rx) = watch::channel(EngineState::Created);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let bus = EventBus::new(config.bus.capacity);
        let hub = Arc::new(FanoutHub::new(config.fanout.subscriber_queue));

        Self {
            config,
            state_tx,
            state_rx,
            storage,
            bus,
            hub,
            shutdown_tx,
            shutdown_rx,
            task_handles: RwLock::new(Vec::new()),
            dataset_records: 0,
        }
    }

    /// Get current engine state.
    pub fn state(&self) -> EngineState {
        *self.state_rx.borrow()
    }

    /// Get a receiver to watch state changes.
    pub fn state_receiver(&self) -> watch::Receiver<EngineState> {
        self.state_rx.clone()
    }

    /// Check if the engine is running.
    pub fn is_running(&self) -> bool {
        matches!(self.state(), EngineState::Running)
    }

    /// The multicast bus (for external producers or extra consumers).
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// The live fan-out hub.
    pub fn hub(&self) -> &Arc<FanoutHub> {
        &self.hub
    }

    /// The durable store.
    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    /// Register a live subscriber, optionally filtered to one device.
    ///
    /// Works in any state; a subscriber registered before `start()` simply
    /// sees no telemetry until the replay loop begins.
    pub async fn register_subscriber(&self, filter: Option<String>) -> Subscription {
        self.hub.register(filter).await
    }

    /// Health snapshot for monitoring endpoints. Performs no I/O.
    pub async fn health(&self) -> EngineHealth {
        let state = self.state();
        EngineHealth {
            state,
            ready: state == EngineState::Running,
            subscribers: self.hub.connection_count().await,
            published: self.bus.published(),
            dataset_records: self.dataset_records,
        }
    }

    /// Start the telemetry pipeline.
    ///
    /// 1. Loads the dataset (when emission is enabled); zero usable
    ///    records is fatal and leaves the engine `Failed`.
    /// 2. Spawns the sink and fan-out consumers (when enabled).
    /// 3. Spawns the replay producer last, so consumers see every record.
    pub async fn start(&mut self) -> Result<()> {
        if self.state() != EngineState::Created {
            return Err(TelemetryError::InvalidState {
                expected: "Created".to_string(),
                actual: format!("{:?}", self.state()),
            });
        }

        info!(
            dataset = %self.config.dataset_path,
            emitter = self.config.emitter.enabled,
            fanout = self.config.fanout.enabled,
            sink = self.config.sink.enabled,
            "Starting telemetry engine"
        );

        let _ = self.state_tx.send(EngineState::Loading);
        metrics::set_engine_state("Loading");

        // The replay scheduler needs records; everything else can run
        // without them (e.g. an external producer publishing to the bus).
        let scheduler = if self.config.emitter.enabled {
            let snapshot = match dataset::load_dataset(&self.config.dataset_path) {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    error!(error = %e, "Dataset load failed");
                    let _ = self.state_tx.send(EngineState::Failed);
                    metrics::set_engine_state("Failed");
                    return Err(e);
                }
            };

            let interval = self.config.emitter.resolve_tick_interval();
            self.dataset_records = snapshot.len();
            Some(ReplayScheduler::new(&snapshot, interval)?)
        } else {
            info!("Telemetry emission disabled via configuration");
            None
        };

        let mut handles = self.task_handles.write().await;

        // Consumers first: both paths must be attached before the first
        // publish.
        if self.config.sink.enabled {
            let storage = Arc::clone(&self.storage);
            let bus_sub = self.bus.subscribe("sink");
            let sink_config = self.config.sink.clone();
            let shutdown_rx = self.shutdown_rx.clone();
            handles.push(tokio::spawn(sink::run_sink(
                storage, bus_sub, sink_config, shutdown_rx,
            )));
            debug!("Spawned batch sink");
        } else {
            info!("Batch sink disabled via configuration");
        }

        if self.config.fanout.enabled {
            let bus_sub = self.bus.subscribe("fanout");
            handles.push(tokio::spawn(fanout::run_broadcast(
                Arc::clone(&self.hub),
                bus_sub,
                self.shutdown_rx.clone(),
            )));

            let heartbeat = self.config.fanout.heartbeat_interval_duration();
            handles.push(tokio::spawn(fanout::run_heartbeat(
                Arc::clone(&self.hub),
                heartbeat,
                self.shutdown_rx.clone(),
            )));
            debug!("Spawned fan-out broadcast and heartbeat");
        } else {
            info!("Live fan-out disabled via configuration");
        }

        if let Some(scheduler) = scheduler {
            info!(
                records = scheduler.len(),
                interval_ms = scheduler.interval().as_millis() as u64,
                "Spawning replay scheduler"
            );
            handles.push(tokio::spawn(replay::run_replay(
                scheduler,
                self.bus.clone(),
                self.shutdown_rx.clone(),
            )));
        }

        drop(handles);

        let _ = self.state_tx.send(EngineState::Running);
        metrics::set_engine_state("Running");
        info!("Telemetry engine running");

        Ok(())
    }

    /// Shut the engine down gracefully.
    ///
    /// Shutdown sequence:
    /// 1. Signal the replay, heartbeat, fan-out, and sink tasks to stop
    /// 2. Wait for tasks to drain (the sink flushes its pending window)
    /// 3. Force-close every remaining live subscriber
    pub async fn shutdown(&mut self) {
        info!("Shutting down telemetry engine");
        let _ = self.state_tx.send(EngineState::ShuttingDown);
        metrics::set_engine_state("ShuttingDown");

        // Signal shutdown to all tasks
        let _ = self.shutdown_tx.send(true);

        let handles: Vec<_> = {
            let mut guard = self.task_handles.write().await;
            std::mem::take(&mut *guard)
        };

        let task_count = handles.len();
        if task_count > 0 {
            info!(task_count, "Waiting for tasks to drain and complete");
        }

        // Give the sink time to flush its final window.
        let drain_timeout = std::time::Duration::from_secs(10);
        for (i, handle) in handles.into_iter().enumerate() {
            match tokio::time::timeout(drain_timeout, handle).await {
                Ok(Ok(())) => {
                    debug!(task = i + 1, "Task completed gracefully");
                }
                Ok(Err(e)) => {
                    warn!(task = i + 1, error = %e, "Task panicked during shutdown");
                }
                Err(_) => {
                    warn!(task = i + 1, "Task timed out during shutdown");
                }
            }
        }

        // In-flight sends are abandoned; remaining connections force-closed.
        self.hub.close_all().await;

        let _ = self.state_tx.send(EngineState::Stopped);
        metrics::set_engine_state("Stopped");
        info!("Telemetry engine stopped");
    }
}
