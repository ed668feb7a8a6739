//! Periodic task plumbing.
//!
//! One abstraction for every fixed-cadence loop in the engine (replay
//! ticks, fan-out heartbeats): a tokio interval paired with the shutdown
//! watch channel. Tasks loop on [`Periodic::tick`] and exit cleanly the
//! moment shutdown is signaled, even mid-wait.
//!
//! ```rust,no_run
//! # async fn example(shutdown_rx: tokio::sync::watch::Receiver<bool>) {
//! use telemetry_engine::task::Periodic;
//! use std::time::Duration;
//!
//! let mut timer = Periodic::new("heartbeat", Duration::from_secs(30), shutdown_rx);
//! while timer.tick().await {
//!     // one unit of periodic work
//! }
//! # }
//! ```

use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::debug;

/// A cancellable fixed-cadence timer.
///
/// The first tick fires immediately (tokio interval semantics), matching
/// the replay scheduler's publish-on-start behavior. Missed ticks are
/// delayed rather than bursted, so a stalled task never publishes a
/// backlog of ticks at once.
pub struct Periodic {
    name: &'static str,
    interval: Interval,
    shutdown_rx: watch::Receiver<bool>,
}

impl Periodic {
    /// Create a periodic timer with the given cadence, observing the
    /// engine shutdown signal.
    pub fn new(name: &'static str, period: Duration, shutdown_rx: watch::Receiver<bool>) -> Self {
        let mut interval = interval(period.max(Duration::from_millis(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            name,
            interval,
            shutdown_rx,
        }
    }

    /// Wait for the next tick.
    ///
    /// Returns `true` when a tick fired, `false` when shutdown was
    /// signaled; the caller's loop should exit on `false`.
    pub async fn tick(&mut self) -> bool {
        loop {
            tokio::select! {
                biased;

                changed = self.shutdown_rx.changed() => {
                    match changed {
                        Ok(()) if !*self.shutdown_rx.borrow() => continue,
                        _ => {
                            debug!(task = self.name, "Periodic task stopping");
                            return false;
                        }
                    }
                }

                _ = self.interval.tick() => return true,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_is_immediate() {
        let (_tx, rx) = watch::channel(false);
        let mut timer = Periodic::new("test", Duration::from_secs(60), rx);
        assert!(timer.tick().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_at_cadence() {
        let (_tx, rx) = watch::channel(false);
        let mut timer = Periodic::new("test", Duration::from_secs(10), rx);

        let start = tokio::time::Instant::now();
        assert!(timer.tick().await); // immediate
        assert!(timer.tick().await);
        assert!(timer.tick().await);
        assert_eq!(start.elapsed(), Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_ticks() {
        let (tx, rx) = watch::channel(false);
        let mut timer = Periodic::new("test", Duration::from_secs(60), rx);
        assert!(timer.tick().await);

        tx.send(true).unwrap();
        assert!(!timer.tick().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_waiting_tick() {
        let (tx, rx) = watch::channel(false);
        let mut timer = Periodic::new("test", Duration::from_secs(3600), rx);
        assert!(timer.tick().await); // immediate first tick

        let handle = tokio::spawn(async move { timer.tick().await });
        tokio::task::yield_now().await;
        tx.send(true).unwrap();

        assert!(!handle.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_already_signaled() {
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();
        let mut timer = Periodic::new("test", Duration::from_secs(1), rx);
        // The shutdown branch wins via biased select even though a tick
        // is also ready.
        assert!(!timer.tick().await);
    }
}
