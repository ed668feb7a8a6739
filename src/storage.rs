// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Durable storage integration.
//!
//! Defines the interface the batch sink flushes into, plus two
//! implementations: an in-memory map for tests and standalone mode, and a
//! SQLite store for real persistence.
//!
//! # Idempotence Contract
//!
//! `upsert` must be idempotent on `(time, device_id)` with last-write-wins
//! on conflict. The replay scheduler re-emits the same keys every cycle
//! boundary is restarted and the sink may re-flush after retries, so the
//! store must tolerate duplicates without duplicating rows.
//!
//! # Example
//!
//! ```rust,no_run
//! use telemetry_engine::storage::{Storage, StorageResult, BoxFuture};
//! use telemetry_engine::record::TelemetryRecord;
//!
//! struct MyBackend { /* ... */ }
//!
//! impl Storage for MyBackend {
//!     fn upsert(&self, batch: Vec<TelemetryRecord>) -> BoxFuture<'_, usize> {
//!         Box::pin(async move { Ok(batch.len()) })
//!     }
//! }
//! ```

use crate::error::{Result, TelemetryError};
use crate::record::TelemetryRecord;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::collections::BTreeMap;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Configuration for SQLite busy retry behavior
const SQLITE_RETRY_MAX_ATTEMPTS: u32 = 5;
const SQLITE_RETRY_BASE_DELAY_MS: u64 = 10;
const SQLITE_RETRY_MAX_DELAY_MS: u64 = 500;

/// Result type for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Type alias for boxed async futures (reduces trait signature complexity).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = StorageResult<T>> + Send + 'a>>;

/// Simplified error for storage operations at the sink seam.
#[derive(Debug, Clone)]
pub struct StorageError(pub String);

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for StorageError {}

/// Trait defining what the batch sink needs from a durable store.
///
/// The sink only writes; reads, schema management, and migrations belong
/// to the storage owner. This trait allows testing with mocks and
/// decouples the sink from any particular backend.
pub trait Storage: Send + Sync + 'static {
    /// Persist a batch, overwriting any existing row with the same
    /// `(time, device_id)` key (last-write-wins).
    ///
    /// Returns the number of rows written.
    fn upsert(&self, batch: Vec<TelemetryRecord>) -> BoxFuture<'_, usize>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// MemoryStorage: map-backed store for tests and standalone mode
// ═══════════════════════════════════════════════════════════════════════════════

/// In-memory storage keyed by `(time, device_id)`.
///
/// Actually stores rows (unlike a pure no-op) so tests can observe the
/// idempotent last-write-wins behavior.
#[derive(Default)]
pub struct MemoryStorage {
    rows: RwLock<BTreeMap<(i64, String), TelemetryRecord>>,
}

impl MemoryStorage {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored rows.
    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    /// Check if the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }

    /// Fetch a row by key.
    pub async fn get(&self, time: DateTime<Utc>, device_id: &str) -> Option<TelemetryRecord> {
        self.rows
            .read()
            .await
            .get(&(time.timestamp_millis(), device_id.to_string()))
            .cloned()
    }

    /// All stored rows in key order.
    pub async fn rows(&self) -> Vec<TelemetryRecord> {
        self.rows.read().await.values().cloned().collect()
    }
}

impl Storage for MemoryStorage {
    fn upsert(&self, batch: Vec<TelemetryRecord>) -> BoxFuture<'_, usize> {
        Box::pin(async move {
            let written = batch.len();
            let mut rows = self.rows.write().await;
            for record in batch {
                rows.insert(
                    (record.time.timestamp_millis(), record.device_id.clone()),
                    record,
                );
            }
            Ok(written)
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SqliteStorage: sqlx-backed persistence
// ═══════════════════════════════════════════════════════════════════════════════

/// Check if an error is a retryable SQLite busy/locked error
fn is_sqlite_busy_error(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db_err) => {
            // SQLite error codes: SQLITE_BUSY = 5, SQLITE_LOCKED = 6
            if let Some(code) = db_err.code() {
                return code == "5" || code == "6";
            }
            let msg = db_err.message().to_lowercase();
            msg.contains("database is locked") || msg.contains("database is busy")
        }
        _ => false,
    }
}

/// Execute a database operation with retry on SQLITE_BUSY/SQLITE_LOCKED
async fn execute_with_retry<F, Fut, T>(
    operation_name: &str,
    mut f: F,
) -> std::result::Result<T, sqlx::Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, sqlx::Error>>,
{
    let mut attempts = 0;
    let mut delay_ms = SQLITE_RETRY_BASE_DELAY_MS;

    loop {
        attempts += 1;
        match f().await {
            Ok(result) => {
                if attempts > 1 {
                    debug!(
                        operation = operation_name,
                        attempts, "SQLite operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(e) if is_sqlite_busy_error(&e) && attempts < SQLITE_RETRY_MAX_ATTEMPTS => {
                warn!(
                    operation = operation_name,
                    attempts,
                    max_attempts = SQLITE_RETRY_MAX_ATTEMPTS,
                    delay_ms,
                    "SQLite busy, retrying"
                );
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                delay_ms = (delay_ms * 2).min(SQLITE_RETRY_MAX_DELAY_MS);
            }
            Err(e) => {
                if is_sqlite_busy_error(&e) {
                    warn!(
                        operation = operation_name,
                        attempts, "SQLite busy, max retries exceeded"
                    );
                }
                return Err(e);
            }
        }
    }
}

/// Persistent telemetry storage backed by SQLite.
///
/// Rows are keyed by `(time, device_id)` with time stored as epoch
/// milliseconds; upserts overwrite the energy and power values on
/// conflict.
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (or create) the store at the given path.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        info!(path = %path_str, "Initializing telemetry storage");

        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", path_str))
            .map_err(|e| TelemetryError::Config(format!("Invalid SQLite path: {}", e)))?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(2) // Single sequential writer plus headroom
            .connect_with(options)
            .await?;

        Self::with_pool(pool).await
    }

    /// Open an in-memory store (testing).
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| TelemetryError::Config(format!("Invalid SQLite options: {}", e)))?;

        // One connection only: each in-memory connection is its own database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS telemetry (
                time INTEGER NOT NULL,
                device_id TEXT NOT NULL,
                energy_kwh REAL NOT NULL,
                power_kw REAL NOT NULL,
                PRIMARY KEY (time, device_id)
            )
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    /// Upsert a batch inside one transaction.
    async fn upsert_batch(
        &self,
        batch: &[TelemetryRecord],
    ) -> std::result::Result<usize, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        for record in batch {
            sqlx::query(
                r#"
                INSERT INTO telemetry (time, device_id, energy_kwh, power_kw)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT (time, device_id) DO UPDATE SET
                    energy_kwh = excluded.energy_kwh,
                    power_kw = excluded.power_kw
                "#,
            )
            .bind(record.time.timestamp_millis())
            .bind(&record.device_id)
            .bind(record.energy_kwh)
            .bind(record.power_kw)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(batch.len())
    }

    /// Number of stored rows.
    pub async fn count(&self) -> Result<u64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM telemetry")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    /// Fetch a row by key.
    pub async fn get(
        &self,
        time: DateTime<Utc>,
        device_id: &str,
    ) -> Result<Option<TelemetryRecord>> {
        let row: Option<(i64, String, f64, f64)> = sqlx::query_as(
            "SELECT time, device_id, energy_kwh, power_kw FROM telemetry \
             WHERE time = ?1 AND device_id = ?2",
        )
        .bind(time.timestamp_millis())
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(millis, device_id, energy_kwh, power_kw)| {
            TelemetryRecord::new(
                Utc.timestamp_millis_opt(millis).single().unwrap_or_default(),
                device_id,
                energy_kwh,
                power_kw,
            )
        }))
    }

    /// Close the pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

impl Storage for SqliteStorage {
    fn upsert(&self, batch: Vec<TelemetryRecord>) -> BoxFuture<'_, usize> {
        Box::pin(async move {
            let rows = batch.as_slice();
            execute_with_retry("upsert", || self.upsert_batch(rows))
                .await
                .map_err(|e| StorageError(e.to_string()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(device_id: &str, minute: u32, energy: f64) -> TelemetryRecord {
        let time = Utc.with_ymd_and_hms(2024, 5, 1, 0, minute, 0).unwrap();
        TelemetryRecord::new(time, device_id, energy, energy * 60.0)
    }

    #[tokio::test]
    async fn test_memory_upsert_stores_rows() {
        let storage = MemoryStorage::new();
        let written = storage
            .upsert(vec![record("WT-01", 0, 0.5), record("WT-02", 0, 0.7)])
            .await
            .unwrap();

        assert_eq!(written, 2);
        assert_eq!(storage.len().await, 2);
    }

    #[tokio::test]
    async fn test_memory_upsert_idempotent_last_write_wins() {
        let storage = MemoryStorage::new();
        storage.upsert(vec![record("WT-01", 0, 0.5)]).await.unwrap();
        storage.upsert(vec![record("WT-01", 0, 0.9)]).await.unwrap();

        assert_eq!(storage.len().await, 1);
        let time = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let stored = storage.get(time, "WT-01").await.unwrap();
        assert_eq!(stored.energy_kwh, 0.9);
    }

    #[tokio::test]
    async fn test_memory_same_key_twice_in_one_batch() {
        let storage = MemoryStorage::new();
        storage
            .upsert(vec![record("WT-01", 0, 0.5), record("WT-01", 0, 0.8)])
            .await
            .unwrap();

        // One row, latest value.
        assert_eq!(storage.len().await, 1);
        let time = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        assert_eq!(storage.get(time, "WT-01").await.unwrap().energy_kwh, 0.8);
    }

    #[tokio::test]
    async fn test_memory_rows_in_key_order() {
        let storage = MemoryStorage::new();
        storage
            .upsert(vec![
                record("WT-02", 1, 0.1),
                record("WT-01", 0, 0.2),
                record("WT-01", 1, 0.3),
            ])
            .await
            .unwrap();

        let rows = storage.rows().await;
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].device_id, "WT-01");
        assert_eq!(rows[1].device_id, "WT-01");
        assert_eq!(rows[2].device_id, "WT-02");
        assert!(rows[0].time <= rows[1].time);
    }

    #[tokio::test]
    async fn test_sqlite_upsert_and_count() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let written = storage
            .upsert(vec![record("WT-01", 0, 0.5), record("WT-02", 0, 0.7)])
            .await
            .unwrap();

        assert_eq!(written, 2);
        assert_eq!(storage.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_sqlite_upsert_idempotent() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        storage.upsert(vec![record("WT-01", 0, 0.5)]).await.unwrap();
        storage.upsert(vec![record("WT-01", 0, 0.9)]).await.unwrap();

        assert_eq!(storage.count().await.unwrap(), 1);
        let time = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let stored = storage.get(time, "WT-01").await.unwrap().unwrap();
        assert_eq!(stored.energy_kwh, 0.9);
        assert_eq!(stored.power_kw, 54.0);
    }

    #[tokio::test]
    async fn test_sqlite_get_roundtrip() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let original = record("WT-03", 5, 1.25);
        storage.upsert(vec![original.clone()]).await.unwrap();

        let fetched = storage.get(original.time, "WT-03").await.unwrap().unwrap();
        assert_eq!(fetched, original);
    }

    #[tokio::test]
    async fn test_sqlite_get_missing_row() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let time = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        assert!(storage.get(time, "WT-99").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sqlite_empty_batch() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let written = storage.upsert(vec![]).await.unwrap();
        assert_eq!(written, 0);
        assert_eq!(storage.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sqlite_file_backed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("telemetry.db");

        let storage = SqliteStorage::new(&path).await.unwrap();
        storage.upsert(vec![record("WT-01", 0, 0.5)]).await.unwrap();
        assert_eq!(storage.count().await.unwrap(), 1);
        storage.close().await;
    }
}
