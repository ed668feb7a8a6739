// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the telemetry engine.
//!
//! This module defines the error types used throughout the engine.
//! Errors are categorized by their source (dataset, storage, etc.) and
//! include context to help with debugging.
//!
//! # Error Categories
//!
//! | Error Type | Fatal | Description |
//! |------------|-------|-------------|
//! | `Dataset` | Yes | Dataset missing, unreadable, or yields zero usable records |
//! | `Config` | Yes | Configuration invalid |
//! | `InvalidState` | Yes | Engine state machine violation |
//! | `Storage` | No | SQLite errors during persistence |
//! | `Sink` | No | Durable sink rejected a flush (terminal for the sink only) |
//! | `Shutdown` | No | Engine is shutting down |
//! | `Internal` | Yes | Unexpected internal error |
//!
//! # Escalation Behavior
//!
//! Use [`TelemetryError::is_fatal()`] to decide whether a failure should
//! stop the whole engine. Fatal errors mean the dependent subsystems must
//! not start (e.g. an empty dataset leaves the replay scheduler stopped).
//! Non-fatal errors are contained to the subsystem that observed them:
//! a flush failure halts the batch sink but leaves live fan-out running.

use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, TelemetryError>;

/// Errors that can occur while running the telemetry engine.
///
/// Each variant includes context about where the error occurred.
/// Use [`is_fatal()`](Self::is_fatal) to check whether the error should
/// be escalated to process-level visibility.
#[derive(Error, Debug)]
pub enum TelemetryError {
    /// Dataset load failure.
    ///
    /// The dataset file is missing, unreadable, or produced no usable
    /// records after malformed rows were discarded. Fatal: the replay
    /// scheduler does not start without records.
    #[error("Dataset error ({path}): {message}")]
    Dataset { path: String, message: String },

    /// SQLite error during batch persistence.
    ///
    /// Occurs when writing telemetry batches to the durable store.
    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// The durable sink rejected a flush after exhausting retries.
    ///
    /// Terminal for the sink's bus consumption; the rest of the engine
    /// keeps running.
    #[error("Sink error: {0}")]
    Sink(String),

    /// Invalid or missing configuration.
    ///
    /// Not recoverable - fix the configuration and restart.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Engine state machine violation.
    ///
    /// Occurs when an operation is attempted in the wrong state
    /// (e.g. calling `start()` on an already-running engine).
    /// Indicates a bug in the caller.
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// Shutdown in progress.
    ///
    /// Returned when operations are attempted during shutdown.
    #[error("Shutdown in progress")]
    Shutdown,

    /// Unexpected internal error.
    ///
    /// Catch-all for errors that shouldn't happen.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TelemetryError {
    /// Create a dataset error with path context.
    pub fn dataset(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Dataset {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Check if this error should stop the whole engine.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Dataset { .. } => true,
            Self::Config(_) => true,
            Self::InvalidState { .. } => true,
            Self::Internal(_) => true,
            Self::Storage(_) => false, // Contained to the sink
            Self::Sink(_) => false,
            Self::Shutdown => false,
        }
    }
}
