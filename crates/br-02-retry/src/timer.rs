//! Backoff timers.

use rand::Rng;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Computes the wait before a retry.
pub trait RetryTimer: fmt::Debug + Send + Sync {
    /// Wait after failed attempt number `attempt` (1-indexed).
    fn next_wait(&self, attempt: u32) -> Duration;
}

/// Zero wait. For in-process calls.
#[derive(Debug, Clone, Copy, Default)]
pub struct InstantTimer;

impl RetryTimer for InstantTimer {
    fn next_wait(&self, _attempt: u32) -> Duration {
        Duration::ZERO
    }
}

/// Wait doubles from `initial` up to `max`.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialTimer {
    pub initial: Duration,
    pub max: Duration,
}

impl ExponentialTimer {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { initial, max }
    }
}

impl RetryTimer for ExponentialTimer {
    fn next_wait(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(31);
        self.initial
            .checked_mul(1u32 << shift)
            .unwrap_or(self.max)
            .min(self.max)
    }
}

/// Exponential wait with downward jitter.
///
/// Never exceeds the exponential wait, so the cap still holds.
#[derive(Debug, Clone, Copy)]
pub struct RandomizedExponentialTimer {
    inner: ExponentialTimer,
    /// Fraction of the wait that may be shaved off, in `[0, 1]`.
    jitter: f64,
}

impl RandomizedExponentialTimer {
    pub fn new(initial: Duration, max: Duration, jitter: f64) -> Self {
        Self {
            inner: ExponentialTimer::new(initial, max),
            jitter: jitter.clamp(0.0, 1.0),
        }
    }
}

impl RetryTimer for RandomizedExponentialTimer {
    fn next_wait(&self, attempt: u32) -> Duration {
        let wait = self.inner.next_wait(attempt);
        let factor = 1.0 - self.jitter * rand::thread_rng().gen::<f64>();
        wait.mul_f64(factor)
    }
}

/// Backoff selection from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackoffKind {
    Instant,
    Exponential,
    #[default]
    RandomizedExponential,
}

impl FromStr for BackoffKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "instant" => Ok(BackoffKind::Instant),
            "exponential" => Ok(BackoffKind::Exponential),
            "randomized" | "randomized_exponential" => Ok(BackoffKind::RandomizedExponential),
            other => Err(format!("unknown backoff kind: {}", other)),
        }
    }
}
