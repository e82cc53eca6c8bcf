//! Whole-attempt retry with an interruptible back-off

use crate::config::RetryConfig;
use kel_common::{KelError, Result};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            interval: Duration::from_secs(config.retry_interval_sec),
        }
    }
}

/// Shared flag that wakes and cancels pending retry sleeps
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        let (flag, cvar) = &*self.inner;
        *flag.lock() = true;
        cvar.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        *self.inner.0.lock()
    }

    /// Sleep for `duration`; returns `false` if interrupted first.
    pub fn sleep(&self, duration: Duration) -> bool {
        let (flag, cvar) = &*self.inner;
        let mut triggered = flag.lock();
        if *triggered {
            return false;
        }
        // loop on spurious wakeups until the deadline or a trigger
        let deadline = std::time::Instant::now() + duration;
        while !*triggered {
            if cvar.wait_until(&mut triggered, deadline).timed_out() {
                break;
            }
        }
        !*triggered
    }
}

/// Runs an operation up to `max_retries + 1` times.
///
/// Non-retryable errors (see [`KelError::is_retryable`]) end the loop at once.
#[derive(Debug, Clone, Default)]
pub struct RetryService {
    interrupt: Interrupt,
}

impl RetryService {
    pub fn new(interrupt: Interrupt) -> Self {
        Self { interrupt }
    }

    pub fn interrupt(&self) -> &Interrupt {
        &self.interrupt
    }

    /// `operation` receives the zero-based attempt number.
    pub fn execute<T, F>(&self, policy: RetryPolicy, name: &str, mut operation: F) -> Result<T>
    where
        F: FnMut(u32) -> Result<T>,
    {
        let max_attempts = policy.max_retries.saturating_add(1);
        let mut attempt = 0;
        loop {
            match operation(attempt) {
                Ok(value) => {
                    if attempt > 0 {
                        info!(operation = name, attempt = attempt + 1, "Succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if !e.is_retryable() => {
                    warn!(operation = name, error = %e, "Not retrying");
                    return Err(e);
                }
                Err(e) if attempt + 1 >= max_attempts => {
                    if policy.max_retries > 0 {
                        warn!(operation = name, attempts = max_attempts, error = %e, "Retries exhausted");
                    }
                    return Err(e);
                }
                Err(e) => {
                    warn!(
                        operation = name,
                        attempt = attempt + 1,
                        max_attempts,
                        retry_in_secs = policy.interval.as_secs(),
                        error = %e,
                        "Attempt failed, retrying"
                    );
                    if !self.interrupt.sleep(policy.interval) {
                        return Err(KelError::Interrupted(format!(
                            "{name} interrupted while waiting to retry after: {e}"
                        )));
                    }
                    attempt += 1;
                }
            }
        }
    }
}
