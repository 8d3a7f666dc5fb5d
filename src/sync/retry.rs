//! Bounded retry with exponential backoff

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_interval_ms: u64,
    pub multiplier: f64,
    pub max_interval_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_interval_ms: 50,
            multiplier: 2.0,
            max_interval_ms: 1_000,
        }
    }
}

/// Result of a bounded poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOutcome {
    pub satisfied: bool,
    pub attempts: u32,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_interval: Duration) -> Self {
        Self {
            max_attempts,
            initial_interval_ms: initial_interval.as_millis() as u64,
            ..Default::default()
        }
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_max_interval(mut self, max_interval: Duration) -> Self {
        self.max_interval_ms = max_interval.as_millis() as u64;
        self
    }

    /// Delay before attempt `attempt + 1`, counting attempts from 1
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let millis = self.initial_interval_ms as f64 * self.multiplier.max(1.0).powi(exponent);
        Duration::from_millis(millis.min(self.max_interval_ms as f64) as u64)
    }

    /// Call `probe` until it reports true or attempts run out
    pub async fn poll_until<F, Fut, E>(&self, mut probe: F) -> Result<PollOutcome, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<bool, E>>,
    {
        let max = self.max_attempts.max(1);
        for attempt in 1..=max {
            if probe().await? {
                return Ok(PollOutcome {
                    satisfied: true,
                    attempts: attempt,
                });
            }
            if attempt < max {
                tokio::time::sleep(self.delay_after(attempt)).await;
            }
        }
        Ok(PollOutcome {
            satisfied: false,
            attempts: max,
        })
    }

    /// Run `op` until it succeeds; the last error is returned when attempts run out
    pub async fn retry<F, Fut, T, E>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= max => return Err(e),
                Err(_) => {
                    tokio::time::sleep(self.delay_after(attempt)).await;
                    attempt += 1;
                }
            }
        }
    }
}
