//! Error types for retry execution

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Why a retry loop gave up.
///
/// Every variant except `Cancelled` carries the last error the action
/// returned.
#[derive(Debug, Error)]
pub enum RetryError<E: fmt::Debug + fmt::Display> {
    /// Predicate rejected the failure
    #[error("Not retryable after {attempts} attempt(s): {last}")]
    NotRetryable { attempts: u32, last: E },

    /// All attempts used
    #[error("Retry attempts exhausted after {attempts} attempt(s): {last}")]
    AttemptsExhausted { attempts: u32, last: E },

    /// Next wait would exceed the total time budget
    #[error("Retry time limit exceeded after {attempts} attempt(s) in {elapsed:?}: {last}")]
    TimeLimitExceeded {
        attempts: u32,
        elapsed: Duration,
        last: E,
    },

    /// Scoping token cancelled
    #[error("Retry cancelled after {attempts} attempt(s)")]
    Cancelled { attempts: u32 },
}

impl<E: fmt::Debug + fmt::Display> RetryError<E> {
    /// Number of times the action ran.
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::NotRetryable { attempts, .. }
            | RetryError::AttemptsExhausted { attempts, .. }
            | RetryError::TimeLimitExceeded { attempts, .. }
            | RetryError::Cancelled { attempts } => *attempts,
        }
    }

    pub fn last_error(&self) -> Option<&E> {
        match self {
            RetryError::NotRetryable { last, .. }
            | RetryError::AttemptsExhausted { last, .. }
            | RetryError::TimeLimitExceeded { last, .. } => Some(last),
            RetryError::Cancelled { .. } => None,
        }
    }

    /// Take the last error, if the loop did not end by cancellation.
    pub fn into_last_error(self) -> Option<E> {
        match self {
            RetryError::NotRetryable { last, .. }
            | RetryError::AttemptsExhausted { last, .. }
            | RetryError::TimeLimitExceeded { last, .. } => Some(last),
            RetryError::Cancelled { .. } => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RetryError::Cancelled { .. })
    }

    /// True when a retryable failure ran out of attempts or time.
    pub fn is_exhausted(&self) -> bool {
        matches!(
            self,
            RetryError::AttemptsExhausted { .. } | RetryError::TimeLimitExceeded { .. }
        )
    }
}
