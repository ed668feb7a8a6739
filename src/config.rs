//! Configuration for the telemetry engine.
//!
//! This module defines all configuration types needed to run the engine.
//! Configuration is passed to [`TelemetryEngine::new()`](crate::TelemetryEngine::new)
//! and can be constructed programmatically or deserialized from YAML/JSON.
//!
//! # Quick Start
//!
//! ```rust
//! use telemetry_engine::config::EngineConfig;
//!
//! let config = EngineConfig {
//!     dataset_path: "data/device_energy_data.csv".into(),
//!     ..Default::default()
//! };
//! ```
//!
//! # Configuration Structure
//!
//! ```text
//! EngineConfig
//! ├── dataset_path: String         # Historical CSV dataset
//! ├── bus: BusConfig               # Multicast channel capacity
//! ├── emitter: EmitterConfig       # Replay tick cadence
//! ├── fanout: FanoutConfig         # Live subscriber fan-out
//! └── sink: SinkConfig             # Durable batch persistence
//! ```
//!
//! # Environment Overrides
//!
//! The replay tick interval honors two environment variables, resolved in
//! priority order at startup:
//!
//! 1. `EMIT_INTERVAL_MS` - explicit interval in milliseconds
//! 2. `EMIT_ACCELERATE=true` (or the `accelerate` config flag) - use the
//!    accelerated interval
//! 3. Otherwise the configured default interval
//!
//! # YAML Example
//!
//! ```yaml
//! dataset_path: "data/device_energy_data.csv"
//!
//! emitter:
//!   enabled: true
//!   tick_interval: "60s"
//!   accelerated_interval: "1s"
//!   accelerate: false
//!
//! sink:
//!   batch_size: 500
//!   flush_interval: "200ms"
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

// ═══════════════════════════════════════════════════════════════════════════════
// Top-level config: passed to TelemetryEngine::new()
// ═══════════════════════════════════════════════════════════════════════════════

/// The top-level config object passed to `TelemetryEngine::new()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Path to the historical dataset CSV.
    #[serde(default = "default_dataset_path")]
    pub dataset_path: String,

    /// Event bus settings.
    #[serde(default)]
    pub bus: BusConfig,

    /// Replay emitter settings (tick cadence, acceleration).
    #[serde(default)]
    pub emitter: EmitterConfig,

    /// Live fan-out settings (heartbeat, subscriber queues).
    #[serde(default)]
    pub fanout: FanoutConfig,

    /// Durable batch sink settings (window bounds).
    #[serde(default)]
    pub sink: SinkConfig,
}

fn default_dataset_path() -> String {
    "data/device_energy_data.csv".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dataset_path: default_dataset_path(),
            bus: BusConfig::default(),
            emitter: EmitterConfig::default(),
            fanout: FanoutConfig::default(),
            sink: SinkConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Create a config for testing: fast ticks, tiny batches, short flushes.
    pub fn for_testing(dataset_path: &str) -> Self {
        Self {
            dataset_path: dataset_path.to_string(),
            bus: BusConfig { capacity: 64 },
            emitter: EmitterConfig {
                enabled: true,
                tick_interval: "10ms".to_string(),
                accelerated_interval: "5ms".to_string(),
                accelerate: false,
            },
            fanout: FanoutConfig {
                enabled: true,
                heartbeat_interval: "100ms".to_string(),
                subscriber_queue: 16,
            },
            sink: SinkConfig {
                enabled: true,
                batch_size: 10,
                flush_interval: "50ms".to_string(),
            },
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// BusConfig: multicast channel settings
// ═══════════════════════════════════════════════════════════════════════════════

/// Event bus configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Pending records buffered per consumer path before the oldest are
    /// dropped for that path.
    #[serde(default = "default_bus_capacity")]
    pub capacity: usize,
}

fn default_bus_capacity() -> usize {
    5000
}

impl Default for BusConfig {
    fn default() -> Self {
        Self { capacity: 5000 }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// EmitterConfig: replay tick cadence
// ═══════════════════════════════════════════════════════════════════════════════

/// Replay emitter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmitterConfig {
    /// Whether telemetry emission is enabled.
    /// When disabled the replay scheduler does not start at all.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Tick interval as a duration string (e.g. "60s").
    /// One record is published per tick.
    #[serde(default = "default_tick_interval")]
    pub tick_interval: String,

    /// Accelerated tick interval used when `accelerate` is set
    /// (or `EMIT_ACCELERATE=true` in the environment).
    #[serde(default = "default_accelerated_interval")]
    pub accelerated_interval: String,

    /// Run at the accelerated cadence (demo / development mode).
    #[serde(default = "default_false")]
    pub accelerate: bool,
}

fn default_true() -> bool {
    true
}

fn default_false() -> bool {
    false
}

fn default_tick_interval() -> String {
    "60s".to_string()
}

fn default_accelerated_interval() -> String {
    "1s".to_string()
}

impl Default for EmitterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_interval: "60s".to_string(),
            accelerated_interval: "1s".to_string(),
            accelerate: false,
        }
    }
}

impl EmitterConfig {
    /// Parse the configured tick interval to a Duration.
    pub fn tick_interval_duration(&self) -> Duration {
        humantime::parse_duration(&self.tick_interval).unwrap_or(Duration::from_secs(60))
    }

    /// Parse the accelerated interval to a Duration.
    pub fn accelerated_interval_duration(&self) -> Duration {
        humantime::parse_duration(&self.accelerated_interval).unwrap_or(Duration::from_secs(1))
    }

    /// Resolve the effective tick interval from the environment and config.
    ///
    /// Priority: `EMIT_INTERVAL_MS` env override, then accelerated mode
    /// (config flag or `EMIT_ACCELERATE=true`), then the default interval.
    pub fn resolve_tick_interval(&self) -> Duration {
        self.resolve_with(
            std::env::var("EMIT_INTERVAL_MS").ok().as_deref(),
            std::env::var("EMIT_ACCELERATE").ok().as_deref(),
        )
    }

    fn resolve_with(&self, override_ms: Option<&str>, accelerate_env: Option<&str>) -> Duration {
        if let Some(raw) = override_ms {
            match raw.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => return Duration::from_millis(ms),
                _ => {
                    warn!(value = %raw, "Invalid EMIT_INTERVAL_MS value, falling back to defaults");
                }
            }
        }

        let accelerate = self.accelerate
            || accelerate_env
                .map(|v| v.trim().eq_ignore_ascii_case("true"))
                .unwrap_or(false);

        if accelerate {
            self.accelerated_interval_duration()
        } else {
            self.tick_interval_duration()
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// FanoutConfig: live subscriber fan-out
// ═══════════════════════════════════════════════════════════════════════════════

/// Live fan-out configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanoutConfig {
    /// Whether live fan-out is enabled.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Heartbeat cadence as a duration string (e.g. "30s").
    /// Subscribers that fail to receive the keep-alive are pruned.
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval: String,

    /// Per-subscriber frame queue depth. A subscriber that cannot drain
    /// this many frames is treated as dead and removed.
    #[serde(default = "default_subscriber_queue")]
    pub subscriber_queue: usize,
}

fn default_heartbeat_interval() -> String {
    "30s".to_string()
}

fn default_subscriber_queue() -> usize {
    64
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            heartbeat_interval: "30s".to_string(),
            subscriber_queue: 64,
        }
    }
}

impl FanoutConfig {
    /// Parse the heartbeat interval to a Duration.
    pub fn heartbeat_interval_duration(&self) -> Duration {
        humantime::parse_duration(&self.heartbeat_interval).unwrap_or(Duration::from_secs(30))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SinkConfig: durable batch persistence
// ═══════════════════════════════════════════════════════════════════════════════

/// Durable batch sink configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Whether the durable sink is enabled.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum records buffered before forcing a flush.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Maximum time to wait after the first buffered record before
    /// flushing, as a duration string (e.g. "200ms").
    #[serde(default = "default_flush_interval")]
    pub flush_interval: String,
}

fn default_batch_size() -> usize {
    500
}

fn default_flush_interval() -> String {
    "200ms".to_string()
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            batch_size: 500,
            flush_interval: "200ms".to_string(),
        }
    }
}

impl SinkConfig {
    /// Parse the flush interval to a Duration.
    pub fn flush_interval_duration(&self) -> Duration {
        humantime::parse_duration(&self.flush_interval).unwrap_or(Duration::from_millis(200))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_default() {
        let config = EngineConfig::default();
        assert_eq!(config.dataset_path, "data/device_energy_data.csv");
        assert_eq!(config.bus.capacity, 5000);
        assert!(config.emitter.enabled);
        assert!(config.fanout.enabled);
        assert!(config.sink.enabled);
    }

    #[test]
    fn test_emitter_defaults() {
        let config = EmitterConfig::default();
        assert_eq!(config.tick_interval_duration(), Duration::from_secs(60));
        assert_eq!(config.accelerated_interval_duration(), Duration::from_secs(1));
        assert!(!config.accelerate);
    }

    #[test]
    fn test_tick_interval_various_formats() {
        let test_cases = [
            ("5s", Duration::from_secs(5)),
            ("1m", Duration::from_secs(60)),
            ("500ms", Duration::from_millis(500)),
            ("2min", Duration::from_secs(120)),
        ];

        for (input, expected) in test_cases {
            let config = EmitterConfig {
                tick_interval: input.to_string(),
                ..Default::default()
            };
            assert_eq!(
                config.tick_interval_duration(),
                expected,
                "Failed for input: {}",
                input
            );
        }
    }

    #[test]
    fn test_tick_interval_invalid_fallback() {
        let config = EmitterConfig {
            tick_interval: "invalid".to_string(),
            ..Default::default()
        };
        // Should fall back to 60 seconds
        assert_eq!(config.tick_interval_duration(), Duration::from_secs(60));
    }

    #[test]
    fn test_resolve_env_override_wins() {
        let config = EmitterConfig::default();
        let interval = config.resolve_with(Some("250"), Some("true"));
        assert_eq!(interval, Duration::from_millis(250));
    }

    #[test]
    fn test_resolve_invalid_override_falls_through() {
        let config = EmitterConfig::default();
        // Garbage override is ignored; accelerate env still applies
        let interval = config.resolve_with(Some("fast"), Some("true"));
        assert_eq!(interval, Duration::from_secs(1));
    }

    #[test]
    fn test_resolve_zero_override_falls_through() {
        let config = EmitterConfig::default();
        let interval = config.resolve_with(Some("0"), None);
        assert_eq!(interval, Duration::from_secs(60));
    }

    #[test]
    fn test_resolve_accelerate_flag() {
        let config = EmitterConfig {
            accelerate: true,
            ..Default::default()
        };
        assert_eq!(config.resolve_with(None, None), Duration::from_secs(1));
    }

    #[test]
    fn test_resolve_accelerate_env_case_insensitive() {
        let config = EmitterConfig::default();
        assert_eq!(config.resolve_with(None, Some("TRUE")), Duration::from_secs(1));
        assert_eq!(config.resolve_with(None, Some("false")), Duration::from_secs(60));
        assert_eq!(config.resolve_with(None, Some("nope")), Duration::from_secs(60));
    }

    #[test]
    fn test_resolve_default() {
        let config = EmitterConfig::default();
        assert_eq!(config.resolve_with(None, None), Duration::from_secs(60));
    }

    #[test]
    fn test_fanout_defaults() {
        let config = FanoutConfig::default();
        assert!(config.enabled);
        assert_eq!(config.heartbeat_interval_duration(), Duration::from_secs(30));
        assert_eq!(config.subscriber_queue, 64);
    }

    #[test]
    fn test_sink_defaults() {
        let config = SinkConfig::default();
        assert!(config.enabled);
        assert_eq!(config.batch_size, 500);
        assert_eq!(config.flush_interval_duration(), Duration::from_millis(200));
    }

    #[test]
    fn test_sink_flush_interval_invalid_fallback() {
        let config = SinkConfig {
            flush_interval: "soon".to_string(),
            ..Default::default()
        };
        assert_eq!(config.flush_interval_duration(), Duration::from_millis(200));
    }

    #[test]
    fn test_for_testing_config() {
        let config = EngineConfig::for_testing("fixtures/test.csv");
        assert_eq!(config.dataset_path, "fixtures/test.csv");
        assert_eq!(config.sink.batch_size, 10);
        assert!(config.emitter.tick_interval_duration() < Duration::from_secs(1));
    }

    #[test]
    fn test_config_json_roundtrip() {
        let config = EngineConfig {
            dataset_path: "data/roundtrip.csv".to_string(),
            emitter: EmitterConfig {
                enabled: true,
                tick_interval: "10s".to_string(),
                accelerated_interval: "100ms".to_string(),
                accelerate: true,
            },
            ..Default::default()
        };

        let json = serde_json::to_string(&config).unwrap();
        let parsed: EngineConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.dataset_path, "data/roundtrip.csv");
        assert_eq!(parsed.emitter.tick_interval, "10s");
        assert!(parsed.emitter.accelerate);
        assert_eq!(parsed.bus.capacity, 5000);
    }

    #[test]
    fn test_config_deserializes_with_missing_sections() {
        let json = r#"{"dataset_path": "data/min.csv"}"#;
        let parsed: EngineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.dataset_path, "data/min.csv");
        assert_eq!(parsed.sink.batch_size, 500);
        assert!(parsed.fanout.enabled);
    }
}
