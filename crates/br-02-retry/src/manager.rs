//! Retry loop.

use crate::error::RetryError;
use crate::timer::{
    BackoffKind, ExponentialTimer, InstantTimer, RandomizedExponentialTimer, RetryTimer,
};
use broker_telemetry::log_event;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Plain retry settings, as read from configuration.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total invocations allowed, first attempt included.
    pub max_attempts: u32,
    pub initial_wait: Duration,
    pub max_wait: Duration,
    /// Budget for the whole loop. `None` means attempts alone bound it.
    pub total_time_limit: Option<Duration>,
    pub backoff: BackoffKind,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_wait: Duration::from_millis(100),
            max_wait: Duration::from_secs(10),
            total_time_limit: Some(Duration::from_secs(60)),
            backoff: BackoffKind::RandomizedExponential,
        }
    }
}

impl RetryPolicy {
    /// Immediate retries, for in-process calls.
    pub fn instant(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            total_time_limit: None,
            backoff: BackoffKind::Instant,
            ..Default::default()
        }
    }

    pub fn build(&self) -> RetryManager {
        let timer: Arc<dyn RetryTimer> = match self.backoff {
            BackoffKind::Instant => Arc::new(InstantTimer),
            BackoffKind::Exponential => {
                Arc::new(ExponentialTimer::new(self.initial_wait, self.max_wait))
            }
            BackoffKind::RandomizedExponential => Arc::new(RandomizedExponentialTimer::new(
                self.initial_wait,
                self.max_wait,
                0.25,
            )),
        };
        RetryManager::new(timer, self.max_attempts, self.total_time_limit)
    }
}

/// Runs an action until it succeeds or a bound is hit.
#[derive(Debug, Clone)]
pub struct RetryManager {
    timer: Arc<dyn RetryTimer>,
    max_attempts: u32,
    total_time_limit: Option<Duration>,
}

impl RetryManager {
    /// `max_attempts` below 1 is raised to 1.
    pub fn new(
        timer: Arc<dyn RetryTimer>,
        max_attempts: u32,
        total_time_limit: Option<Duration>,
    ) -> Self {
        Self {
            timer,
            max_attempts: max_attempts.max(1),
            total_time_limit,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Invoke `action` until it succeeds.
    ///
    /// `action` receives the 1-indexed attempt number. After a failure,
    /// `should_retry` decides whether the error is transient. The wait
    /// between attempts aborts as soon as `cancel` fires.
    pub async fn invoke_with_retry<T, E, F, Fut, P>(
        &self,
        mut action: F,
        should_retry: P,
        cancel: &CancellationToken,
    ) -> Result<T, RetryError<E>>
    where
        E: fmt::Debug + fmt::Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
    {
        let start = Instant::now();
        let mut attempts = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(RetryError::Cancelled { attempts });
            }

            attempts += 1;
            let last = match action(attempts).await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !should_retry(&last) {
                return Err(RetryError::NotRetryable { attempts, last });
            }
            if attempts >= self.max_attempts {
                log_event!(warn, "retry", "Retry attempts exhausted", attempts, error = %last);
                return Err(RetryError::AttemptsExhausted { attempts, last });
            }

            let wait = self.timer.next_wait(attempts);
            let elapsed = start.elapsed();
            if let Some(limit) = self.total_time_limit {
                if elapsed + wait > limit {
                    log_event!(warn, "retry", "Retry time limit reached", attempts, elapsed_ms = elapsed.as_millis() as u64, error = %last);
                    return Err(RetryError::TimeLimitExceeded {
                        attempts,
                        elapsed,
                        last,
                    });
                }
            }

            log_event!(debug, "retry", "Retrying after failure", attempts, wait_ms = wait.as_millis() as u64, error = %last);

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RetryError::Cancelled { attempts }),
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }
}
