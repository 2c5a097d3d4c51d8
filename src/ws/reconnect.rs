use std::time::Duration;

use backoff::backoff::Backoff;
use rand::Rng as _;

use super::config::ReconnectConfig;

/// Exponential backoff with optional jitter and an optional attempt budget.
///
/// `delay(n) = min(initial * multiplier^(n-1), max)`, plus up to `jitter_factor * delay`
/// of random extra wait. Once `max_attempts` delays have been handed out,
/// [`Backoff::next_backoff`] returns `None` until [`Backoff::reset`] is called.
#[derive(Debug, Clone)]
pub(crate) struct ReconnectPolicy {
    config: ReconnectConfig,
    attempt: u32,
}

impl ReconnectPolicy {
    pub(crate) fn new(config: ReconnectConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Number of the attempt the last delay was handed out for. `0` after a reset.
    pub(crate) fn attempt(&self) -> u32 {
        self.attempt
    }

    pub(crate) fn is_exhausted(&self) -> bool {
        self.config
            .max_attempts
            .is_some_and(|max| self.attempt >= max)
    }

    /// Delay before attempt `attempt` (1-based), without jitter.
    #[expect(
        clippy::float_arithmetic,
        reason = "Backoff delays do not need exact arithmetic"
    )]
    pub(crate) fn base_delay(&self, attempt: u32) -> Duration {
        let max = self.config.max_backoff;
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let factor = self.config.backoff_multiplier.max(1.0).powi(exponent);
        let seconds = self.config.initial_backoff.as_secs_f64() * factor;

        Duration::try_from_secs_f64(seconds).map_or(max, |delay| delay.min(max))
    }

    #[expect(
        clippy::float_arithmetic,
        reason = "Jitter is a random fraction of the delay"
    )]
    fn jittered(&self, delay: Duration) -> Duration {
        let factor = self.config.jitter_factor;
        if !factor.is_finite() || factor <= 0.0 {
            return delay;
        }

        let extra = factor.min(1.0) * rand::rng().random::<f64>();
        delay.saturating_add(delay.mul_f64(extra))
    }
}

impl Backoff for ReconnectPolicy {
    fn next_backoff(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }

        self.attempt = self.attempt.saturating_add(1);
        Some(self.jittered(self.base_delay(self.attempt)))
    }

    fn reset(&mut self) {
        self.attempt = 0;
    }
}
