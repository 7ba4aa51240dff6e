//! Generic retry policy applied to the write-verify operation and the
//! description-service call, instead of ad-hoc sleeps woven into the
//! business logic.

use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed,
    Exponential,
}

/// A bounded retry schedule: how many attempts, and how long to wait
/// before each retry.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    backoff: Backoff,
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: delay,
            backoff: Backoff::Fixed,
        }
    }

    pub fn exponential(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            backoff: Backoff::Exponential,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay to sleep before the given attempt number (1-based; attempt 1
    /// runs immediately). Exponential doubles per retry: attempt 2 waits
    /// the base delay, attempt 3 twice that, and so on.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        match self.backoff {
            Backoff::Fixed => self.base_delay,
            Backoff::Exponential => {
                let exp = (attempt - 2).min(16);
                self.base_delay.saturating_mul(1u32 << exp)
            }
        }
    }

    /// Run a fallible operation under this policy, sleeping between
    /// attempts. Returns the value and the attempt number that succeeded.
    pub fn run<T, E: fmt::Display>(
        &self,
        label: &str,
        mut op: impl FnMut(u32) -> Result<T, E>,
    ) -> Result<(T, u32), E> {
        let mut last_err = None;
        for attempt in 1..=self.max_attempts {
            if attempt > 1 {
                std::thread::sleep(self.delay_before(attempt));
            }
            match op(attempt) {
                Ok(value) => return Ok((value, attempt)),
                Err(e) => {
                    log::warn!("{label}: attempt {attempt}/{} failed: {e}", self.max_attempts);
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.expect("max_attempts >= 1"))
    }
}
