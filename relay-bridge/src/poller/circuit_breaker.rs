//! Circuit breaker guarding the ledger index.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::{info, warn};

/// State of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Queries are allowed.
    Closed,
    /// Queries are suspended until the cooldown elapses.
    Open,
}

/// Opens after `failure_threshold` consecutive failures and suspends queries
/// for `cooldown`. When the cooldown elapses the breaker closes again with the
/// failure counter back at zero. Any success resets the counter.
pub struct CircuitBreaker {
    state: RwLock<CircuitState>,
    failure_count: AtomicU32,
    failure_threshold: u32,
    opened_at: RwLock<Option<Instant>>,
    cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            state: RwLock::new(CircuitState::Closed),
            failure_count: AtomicU32::new(0),
            failure_threshold: failure_threshold.max(1),
            opened_at: RwLock::new(None),
            cooldown,
        }
    }

    /// Get the current state.
    pub fn state(&self) -> CircuitState {
        self.check_state_transition();
        *self.state.read()
    }

    /// Check if the circuit allows a query.
    pub fn is_allowed(&self) -> bool {
        self.state() == CircuitState::Closed
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count.load(Ordering::SeqCst)
    }

    /// Time left before an open breaker closes.
    pub fn remaining_cooldown(&self) -> Option<Duration> {
        if *self.state.read() != CircuitState::Open {
            return None;
        }
        (*self.opened_at.read()).map(|opened_at| self.cooldown.saturating_sub(opened_at.elapsed()))
    }

    pub fn record_success(&self) {
        self.failure_count.store(0, Ordering::SeqCst);
    }

    pub fn record_failure(&self) {
        if *self.state.read() == CircuitState::Open {
            return;
        }

        let failures = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
        if failures >= self.failure_threshold {
            *self.state.write() = CircuitState::Open;
            *self.opened_at.write() = Some(Instant::now());
            warn!(
                failures,
                cooldown = ?self.cooldown,
                "Index circuit breaker opened, pausing queries"
            );
        }
    }

    /// Reset the circuit breaker to closed state.
    pub fn reset(&self) {
        *self.state.write() = CircuitState::Closed;
        self.failure_count.store(0, Ordering::SeqCst);
        *self.opened_at.write() = None;
    }

    /// Close an open breaker once its cooldown has elapsed.
    fn check_state_transition(&self) {
        let state = *self.state.read();
        let opened_at = *self.opened_at.read();

        if state == CircuitState::Open
            && opened_at.is_some_and(|at| at.elapsed() >= self.cooldown)
        {
            self.reset();
            info!("Index circuit breaker cooldown elapsed, resuming queries");
        }
    }
}
