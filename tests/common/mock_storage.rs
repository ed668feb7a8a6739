//! Mock Storage for testing.
//!
//! Records all upsert() calls for assertions and can be configured to
//! fail the next N flushes (or every flush) to exercise the sink's retry
//! and halt behavior.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use telemetry_engine::record::TelemetryRecord;
use telemetry_engine::storage::{BoxFuture, Storage, StorageError};
use tokio::sync::RwLock;

/// A recorded upsert() call.
#[derive(Debug, Clone)]
pub struct UpsertCall {
    pub batch: Vec<TelemetryRecord>,
}

/// Storage mock that records calls and injects failures.
#[derive(Default)]
pub struct RecordingStorage {
    calls: RwLock<Vec<UpsertCall>>,
    upsert_count: AtomicUsize,
    /// Fail this many upserts before succeeding again.
    fail_next: AtomicUsize,
    /// Fail every upsert regardless of `fail_next`.
    always_fail: AtomicBool,
}

impl RecordingStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` upserts fail.
    pub fn fail_next(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Make every upsert fail.
    pub fn set_always_fail(&self, value: bool) {
        self.always_fail.store(value, Ordering::SeqCst);
    }

    /// Total upsert attempts (including failed ones).
    pub fn upsert_count(&self) -> usize {
        self.upsert_count.load(Ordering::SeqCst)
    }

    /// Successfully flushed batches, in order.
    pub async fn calls(&self) -> Vec<UpsertCall> {
        self.calls.read().await.clone()
    }

    /// All successfully stored records, in flush order.
    pub async fn stored(&self) -> Vec<TelemetryRecord> {
        self.calls
            .read()
            .await
            .iter()
            .flat_map(|call| call.batch.clone())
            .collect()
    }
}

impl Storage for RecordingStorage {
    fn upsert(&self, batch: Vec<TelemetryRecord>) -> BoxFuture<'_, usize> {
        Box::pin(async move {
            self.upsert_count.fetch_add(1, Ordering::SeqCst);

            if self.always_fail.load(Ordering::SeqCst) {
                return Err(StorageError("storage unavailable".to_string()));
            }

            let remaining = self.fail_next.load(Ordering::SeqCst);
            if remaining > 0 {
                self.fail_next.store(remaining - 1, Ordering::SeqCst);
                return Err(StorageError("transient storage failure".to_string()));
            }

            let written = batch.len();
            self.calls.write().await.push(UpsertCall { batch });
            Ok(written)
        })
    }
}
