//! Consumer host lifecycle: health state, shutdown signal and in-flight
//! message tracking.
//!
//! Uses `ArcSwap` for lock-free state transitions, a `CancellationToken` as
//! the shutdown signal and an atomic counter with RAII guards for in-flight
//! messages.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio_util::sync::CancellationToken;

/// Consumer host state.
///
/// State machine: Starting -> Ready -> Draining -> Stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    /// Host built but not yet receiving deliveries.
    Starting,
    /// Host loop is receiving and processing deliveries.
    Ready,
    /// No new deliveries are accepted; in-flight messages are finishing.
    Draining,
    /// Every in-flight message has completed.
    Stopped,
}

/// Coordinates shutdown of one consumer host.
///
/// 1. The host loop selects on `token()` to stop receiving deliveries
/// 2. Each processed message holds an `InFlightGuard`
/// 3. `trigger_shutdown()` moves to Draining and cancels the token
/// 4. `wait_for_drain()` waits until in-flight messages complete
#[derive(Debug)]
pub struct ShutdownController {
    token: CancellationToken,
    in_flight: Arc<AtomicU64>,
    health_state: Arc<ArcSwap<HealthState>>,
}

impl ShutdownController {
    #[must_use]
    pub fn new() -> Self {
        Self::with_token(CancellationToken::new())
    }

    /// Creates a controller whose shutdown signal is `token`, typically a child
    /// of the application's own shutdown token.
    #[must_use]
    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            token,
            in_flight: Arc::new(AtomicU64::new(0)),
            health_state: Arc::new(ArcSwap::from_pointee(HealthState::Starting)),
        }
    }

    pub fn set_ready(&self) {
        self.health_state.store(Arc::new(HealthState::Ready));
    }

    /// The shutdown signal. Cancelled by `trigger_shutdown()`.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Moves to `Draining` and fires the shutdown signal.
    pub fn trigger_shutdown(&self) {
        self.mark_draining();
        self.token.cancel();
    }

    /// Moves to `Draining` without firing the shutdown signal. Used when the
    /// delivery channel closes on its own.
    pub fn mark_draining(&self) {
        if self.health_state() != HealthState::Stopped {
            self.health_state.store(Arc::new(HealthState::Draining));
        }
    }

    #[must_use]
    pub fn health_state(&self) -> HealthState {
        **self.health_state.load()
    }

    /// Increments the in-flight counter until the returned guard is dropped,
    /// including when the message task panics.
    #[must_use]
    pub fn in_flight_guard(&self) -> InFlightGuard {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    #[must_use]
    pub fn in_flight_count(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Waits for all in-flight messages to complete, up to `timeout`.
    ///
    /// Returns `true` and transitions to `Stopped` if everything drained.
    /// Returns `false` if the timeout expired; the state stays `Draining`.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            if self.in_flight.load(Ordering::Relaxed) == 0 {
                self.health_state.store(Arc::new(HealthState::Stopped));
                return true;
            }

            if tokio::time::Instant::now() >= deadline {
                return false;
            }

            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard that decrements the in-flight counter when dropped.
#[derive(Debug)]
pub struct InFlightGuard {
    in_flight: Arc<AtomicU64>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}
