//! Reconnect backoff for the agent's control-channel loop (spec §4.5).

use std::time::Duration;

/// Initial reconnect delay.
pub const INITIAL_DELAY: Duration = Duration::from_secs(5);

/// Reconnect delay cap.
pub const MAX_DELAY: Duration = Duration::from_secs(120);

/// Tracks the reconnect delay across consecutive channel failures,
/// doubling on each attempt up to [`MAX_DELAY`] and resetting to
/// [`INITIAL_DELAY`] on the first successful registration.
#[derive(Debug, Clone)]
pub struct Backoff {
    current: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

impl Backoff {
    pub fn new() -> Self {
        Self {
            current: INITIAL_DELAY,
        }
    }

    /// The delay to wait before the next reconnect attempt.
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Advances the delay for the next failure, returning the delay that
    /// should be waited out *before this* attempt is retried again.
    pub fn advance(&mut self) -> Duration {
        let wait = self.current;
        let doubled = self.current.saturating_mul(2);
        self.current = doubled.min(MAX_DELAY);
        wait
    }

    /// Resets to [`INITIAL_DELAY`] after a successful registration.
    pub fn reset(&mut self) {
        self.current = INITIAL_DELAY;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_doubles_and_caps() {
        let mut backoff = Backoff::new();
        assert_eq!(backoff.advance(), Duration::from_secs(5));
        assert_eq!(backoff.advance(), Duration::from_secs(10));
        assert_eq!(backoff.advance(), Duration::from_secs(20));
        assert_eq!(backoff.advance(), Duration::from_secs(40));
        assert_eq!(backoff.advance(), Duration::from_secs(80));
        // 160 would exceed the 120s cap
        assert_eq!(backoff.advance(), Duration::from_secs(120));
        assert_eq!(backoff.advance(), Duration::from_secs(120));
    }

    #[test]
    fn reset_returns_to_initial_delay() {
        let mut backoff = Backoff::new();
        backoff.advance();
        backoff.advance();
        backoff.reset();
        assert_eq!(backoff.current(), INITIAL_DELAY);
    }

    #[test]
    fn sequence_is_monotonically_non_decreasing_up_to_cap() {
        let mut backoff = Backoff::new();
        let mut prev = Duration::ZERO;
        for _ in 0..10 {
            let d = backoff.advance();
            assert!(d >= prev);
            prev = d;
        }
    }
}
