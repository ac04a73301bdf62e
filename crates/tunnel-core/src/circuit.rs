//! Circuit breaker for ancillary dial operations (spec §4.5).

use std::time::{Duration, Instant};

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("circuit breaker is open")]
pub struct CircuitOpen;

#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

/// `{closed, open, half-open}` per spec §4.5. `closed` passes calls
/// through; `open` rejects until `reset_timeout` has elapsed since the
/// last failure, after which the next call is let through as
/// `half-open` — success returns to `closed`, failure re-opens.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Call before attempting the guarded operation. Transitions
    /// `open` → `half-open` once `reset_timeout` has elapsed.
    pub fn before_call(&mut self) -> Result<(), CircuitOpen> {
        if self.state == CircuitState::Open {
            let elapsed = self.opened_at.map(|t| t.elapsed()).unwrap_or_default();
            if elapsed >= self.config.reset_timeout {
                self.state = CircuitState::HalfOpen;
            } else {
                return Err(CircuitOpen);
            }
        }
        Ok(())
    }

    pub fn on_success(&mut self) {
        self.state = CircuitState::Closed;
        self.consecutive_failures = 0;
        self.opened_at = None;
    }

    pub fn on_failure(&mut self) {
        match self.state {
            CircuitState::HalfOpen => {
                self.state = CircuitState::Open;
                self.opened_at = Some(Instant::now());
            }
            CircuitState::Closed => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= self.config.failure_threshold {
                    self.state = CircuitState::Open;
                    self.opened_at = Some(Instant::now());
                }
            }
            CircuitState::Open => {
                self.opened_at = Some(Instant::now());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trips_open_after_threshold_consecutive_failures() {
        let mut cb = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 3,
            reset_timeout: Duration::from_secs(30),
        });
        for _ in 0..2 {
            cb.before_call().unwrap();
            cb.on_failure();
        }
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.before_call().unwrap();
        cb.on_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.before_call().is_err());
    }

    #[test]
    fn half_open_success_closes_and_resets_counters() {
        let mut cb = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            reset_timeout: Duration::from_millis(0),
        });
        cb.before_call().unwrap();
        cb.on_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        // reset_timeout already elapsed (0ms)
        cb.before_call().unwrap();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.on_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.consecutive_failures, 0);
    }

    #[test]
    fn half_open_failure_reopens() {
        let mut cb = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            reset_timeout: Duration::from_millis(0),
        });
        cb.before_call().unwrap();
        cb.on_failure();
        cb.before_call().unwrap();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.on_failure();
        assert_eq!(cb.state(), CircuitState::Open);
    }
}
