//! Exponential retry delays.

use std::time::Duration;

/// Doubling delay with an upper bound.
///
/// The k-th call to [`Backoff::next_delay`] since the last reset returns
/// `min(initial * 2^(k-1), max)`.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    /// Create a backoff starting at `initial` and capped at `max`.
    #[must_use]
    pub fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.min(max);
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// The delay to wait now. Advances to the next step.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    /// The delay the next call will return.
    #[must_use]
    pub fn peek(&self) -> Duration {
        self.current
    }

    /// Start over from the initial delay.
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}
