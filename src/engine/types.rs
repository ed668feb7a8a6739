//! Engine state types.
//!
//! Defines the state machine for the telemetry engine lifecycle.
//!
//! # State Transitions
//!
//! ```text
//!                  start()
//! Created ───────────────────→ Loading
//!    │                              │
//!    │ (never started)              │ (dataset loaded,
//!    ↓                              ↓  tasks spawned)
//! Stopped ←── ShuttingDown ←──── Running
//!                  ↑                │
//!                  └──── shutdown() ┘
//!
//!          (dataset load failure)
//! Loading ─────────────────────→ Failed
//! ```
//!
//! # State Descriptions
//!
//! - **Created**: Initial state after `TelemetryEngine::new()`. Nothing running.
//! - **Loading**: `start()` called, dataset being loaded and normalized.
//! - **Running**: Normal operation. Replay ticking, fan-out and sink consuming.
//! - **ShuttingDown**: `shutdown()` called. Tasks draining, sink flushing.
//! - **Stopped**: Graceful shutdown complete. Safe to drop.
//! - **Failed**: Dataset load failed or another fatal error. Cannot recover.

/// State of the telemetry engine.
///
/// See module docs for the state transition diagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Engine created but not started.
    ///
    /// Call [`start()`](super::TelemetryEngine::start) to begin.
    Created,

    /// Loading and normalizing the dataset.
    Loading,

    /// Running: replay publishing, consumers attached.
    Running,

    /// Shutting down gracefully.
    ///
    /// The replay and heartbeat loops are cancelled; the sink flushes its
    /// pending window; remaining subscribers are force-closed.
    ShuttingDown,

    /// Stopped cleanly. Safe to drop.
    Stopped,

    /// Fatal error (e.g. dataset yielded zero records).
    ///
    /// Check logs for details. Engine cannot recover from this state.
    Failed,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Created => write!(f, "Created"),
            EngineState::Loading => write!(f, "Loading"),
            EngineState::Running => write!(f, "Running"),
            EngineState::ShuttingDown => write!(f, "ShuttingDown"),
            EngineState::Stopped => write!(f, "Stopped"),
            EngineState::Failed => write!(f, "Failed"),
        }
    }
}

/// Point-in-time engine health snapshot for monitoring endpoints.
///
/// Collected from cached internal state; no I/O.
#[derive(Debug, Clone)]
pub struct EngineHealth {
    /// Current engine state.
    pub state: EngineState,
    /// Whether the engine is serving (state == Running).
    pub ready: bool,
    /// Live subscriber count.
    pub subscribers: usize,
    /// Records published to the bus since start.
    pub published: u64,
    /// Normalized records per replay cycle (0 when emission is disabled).
    pub dataset_records: usize,
}
