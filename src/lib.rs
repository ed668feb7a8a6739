// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # Telemetry Engine
//!
//! Distributes a continuous stream of device energy-telemetry events to
//! two independent consumers - a dynamic set of live subscribers and a
//! durable batch writer - while replaying a finite historical dataset as
//! if it were an unbounded live feed.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                            telemetry-engine                              │
//! │                                                                          │
//! │  ┌───────────┐   ┌─────────────────┐   ┌──────────┐                      │
//! │  │  Dataset  │──▶│ ReplayScheduler │──▶│ EventBus │                      │
//! │  │  (CSV)    │   │ (tick + shift)  │   │(multicast│                      │
//! │  └───────────┘   └─────────────────┘   │ bounded) │                      │
//! │                                        └────┬─────┘                      │
//! │                             ┌───────────────┴──────────────┐             │
//! │                             ▼                              ▼             │
//! │                      ┌────────────┐                 ┌────────────┐       │
//! │                      │ FanoutHub  │                 │ BatchSink  │       │
//! │                      │ (registry +│                 │ (count/time│       │
//! │                      │ heartbeat) │                 │  windows)  │       │
//! │                      └─────┬──────┘                 └─────┬──────┘       │
//! │                            ▼                              ▼              │
//! │                   live subscribers                Storage (upsert)       │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Guarantees
//!
//! - **Ordering**: each consumer path observes records in publish order.
//! - **Backpressure**: the bus is the single control point; a saturated
//!   path drops its own oldest records (counted, logged) and never blocks
//!   the producer or other paths.
//! - **Failure isolation**: a dead subscriber is pruned without touching
//!   the rest; a failed sink flush halts only the sink.
//! - **Cycle separation**: replayed timestamps are shifted by
//!   `span * cycle`, so successive cycles never collide.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use telemetry_engine::{EngineConfig, TelemetryEngine};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = EngineConfig::default();
//!     let mut engine = TelemetryEngine::new(config);
//!     engine.start().await.expect("Failed to start");
//!
//!     let mut subscriber = engine.register_subscriber(Some("WT-01".into())).await;
//!     while let Some(frame) = subscriber.recv().await {
//!         println!("{:?}", frame);
//!     }
//!
//!     engine.shutdown().await;
//! }
//! ```

pub mod bus;
pub mod config;
pub mod dataset;
pub mod engine;
pub mod error;
pub mod fanout;
pub mod metrics;
pub mod record;
pub mod replay;
pub mod resilience;
pub mod sink;
pub mod storage;
pub mod task;

// Re-exports for convenience
pub use bus::{BusSubscription, EventBus};
pub use config::{BusConfig, EmitterConfig, EngineConfig, FanoutConfig, SinkConfig};
pub use dataset::{load_dataset, DatasetSnapshot};
pub use engine::{EngineHealth, EngineState, TelemetryEngine};
pub use error::{Result, TelemetryError};
pub use fanout::{FanoutHub, StreamFrame, Subscription};
pub use record::TelemetryRecord;
pub use replay::ReplayScheduler;
pub use storage::{MemoryStorage, SqliteStorage, Storage};
