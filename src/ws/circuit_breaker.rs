//! Circuit breaker that stops reconnect storms against a server that stays down.
//!
//! ```text
//! Closed --(threshold consecutive failures)--> Open
//! Open --(reset_timeout since last failure)--> HalfOpen (one probe)
//! HalfOpen --success--> Closed
//! HalfOpen --failure--> Open
//! ```

use std::time::Duration;

use strum_macros::Display;
use tokio::time::Instant;

use super::config::CircuitBreakerConfig;

/// Breaker position.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum BreakerState {
    /// Attempts allowed
    Closed,
    /// Attempts blocked until the cooldown elapses
    Open,
    /// Exactly one probing attempt allowed
    HalfOpen,
}

#[derive(Debug)]
pub(crate) struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: BreakerState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    probe_in_flight: bool,
}

impl CircuitBreaker {
    pub(crate) fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: BreakerState::Closed,
            consecutive_failures: 0,
            last_failure: None,
            probe_in_flight: false,
        }
    }

    pub(crate) fn state(&self) -> BreakerState {
        self.state
    }

    pub(crate) fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Whether a connection attempt may start now. Does not change state.
    pub(crate) fn can_attempt_connection(&self) -> bool {
        match self.state {
            BreakerState::Closed => true,
            BreakerState::Open => self.cooldown_elapsed(),
            BreakerState::HalfOpen => !self.probe_in_flight,
        }
    }

    /// Time until [`Self::can_attempt_connection`] may return `true` again.
    pub(crate) fn retry_after(&self) -> Duration {
        match self.state {
            BreakerState::Closed => Duration::ZERO,
            BreakerState::Open => self.last_failure.map_or(Duration::ZERO, |at| {
                self.config.reset_timeout.saturating_sub(at.elapsed())
            }),
            BreakerState::HalfOpen if self.probe_in_flight => self.config.reset_timeout,
            BreakerState::HalfOpen => Duration::ZERO,
        }
    }

    /// Mark the start of an attempt that [`Self::can_attempt_connection`] allowed.
    ///
    /// An open breaker whose cooldown elapsed moves to half-open and the attempt becomes
    /// its single probe.
    pub(crate) fn record_attempt(&mut self) {
        if self.state == BreakerState::Open && self.cooldown_elapsed() {
            self.state = BreakerState::HalfOpen;

            #[cfg(feature = "tracing")]
            tracing::debug!("Circuit breaker half-open, probing connection");
        }

        if self.state == BreakerState::HalfOpen {
            self.probe_in_flight = true;
        }
    }

    /// The attempt was abandoned without an outcome, e.g. by `disconnect()`.
    pub(crate) fn cancel_attempt(&mut self) {
        self.probe_in_flight = false;
    }

    pub(crate) fn on_connection_success(&mut self) {
        #[cfg(feature = "tracing")]
        if self.state != BreakerState::Closed {
            tracing::info!(state = %self.state, "Circuit breaker closed after successful connection");
        }

        self.reset();
    }

    pub(crate) fn on_connection_failure(&mut self) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_failure = Some(Instant::now());
        self.probe_in_flight = false;

        let threshold = self.config.failure_threshold.max(1);
        let opens = match self.state {
            BreakerState::HalfOpen => true,
            BreakerState::Closed => self.consecutive_failures >= threshold,
            BreakerState::Open => false,
        };

        if opens {
            self.state = BreakerState::Open;

            #[cfg(feature = "tracing")]
            tracing::warn!(
                failures = self.consecutive_failures,
                reset_timeout = ?self.config.reset_timeout,
                "Circuit breaker opened"
            );
        }
    }

    /// Forget all failures, e.g. after an external health check succeeded.
    pub(crate) fn reset(&mut self) {
        self.state = BreakerState::Closed;
        self.consecutive_failures = 0;
        self.last_failure = None;
        self.probe_in_flight = false;
    }

    fn cooldown_elapsed(&self) -> bool {
        self.last_failure
            .is_none_or(|at| at.elapsed() >= self.config.reset_timeout)
    }
}
