//! Generic retry policy used by ancillary dial operations (spec §4.5).
//!
//! This is deliberately separate from [`crate::backoff::Backoff`]: the
//! reconnect loop retries forever with a longer cap and no jitter, while
//! this policy bounds the attempt count and jitters the delay, for
//! operations like the agent's target dial.

use std::time::Duration;

use rand::Rng;
use thiserror::Error;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            jitter: 0.1,
        }
    }
}

#[derive(Debug, Error)]
#[error("operation failed after {attempts} attempts: {last_error}")]
pub struct RetryExhausted {
    pub attempts: u32,
    pub last_error: String,
}

impl RetryPolicy {
    /// The delay before attempt `attempt` (1-indexed), with ±jitter applied.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let base = self.initial_delay.as_secs_f64() * exp;
        let capped = base.min(self.max_delay.as_secs_f64());
        let jitter_span = capped * self.jitter;
        let jittered = capped + rand::thread_rng().gen_range(-jitter_span..=jitter_span);
        Duration::from_secs_f64(jittered.max(0.0))
    }

    /// Runs `op`, retrying on `Err` up to `max_attempts` times with the
    /// configured backoff+jitter between attempts.
    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> Result<T, RetryExhausted>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut last_error = String::new();
        for attempt in 1..=self.max_attempts {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    last_error = e.to_string();
                    if attempt < self.max_attempts {
                        tokio::time::sleep(self.delay_for(attempt)).await;
                    }
                }
            }
        }
        Err(RetryExhausted {
            attempts: self.max_attempts,
            last_error,
        })
    }
}
