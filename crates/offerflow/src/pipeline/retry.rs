//! Bounded exponential backoff for the structured-extraction call.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use crate::error::ExtractionError;

/// Errors that know whether another attempt could help.
pub trait Retryable {
    fn is_retryable(&self) -> bool;

    /// Server-requested wait, if any. Never shortens the computed backoff.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl Retryable for ExtractionError {
    fn is_retryable(&self) -> bool {
        ExtractionError::is_retryable(self)
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            ExtractionError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total calls, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Delay after the `attempt`-th failed call (1-based): base, 2x base, 4x base, ...
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[derive(Error, Debug)]
pub enum RetryError<E> {
    #[error("failed after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },

    #[error("failed on attempt {attempt} with a non-retryable error: {error}")]
    Fatal { attempt: u32, error: E },
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Exhausted { attempts, .. } => *attempts,
            Self::Fatal { attempt, .. } => *attempt,
        }
    }

    pub fn into_inner(self) -> E {
        match self {
            Self::Exhausted { last, .. } => last,
            Self::Fatal { error, .. } => error,
        }
    }
}

/// Calls `op` until it succeeds, fails with a non-retryable error, or the policy runs out.
///
/// Delays never decrease between attempts, even when a `Retry-After` hint was shorter than
/// the previous wait.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy,
    mut op: F,
) -> Result<(T, u32), RetryError<E>>
where
    E: Retryable + std::fmt::Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut last_delay = Duration::ZERO;
    let mut attempt = 0;

    loop {
        attempt += 1;
        let error = match op(attempt).await {
            Ok(value) => return Ok((value, attempt)),
            Err(error) => error,
        };
        if !error.is_retryable() {
            return Err(RetryError::Fatal { attempt, error });
        }
        if attempt >= attempts {
            return Err(RetryError::Exhausted {
                attempts,
                last: error,
            });
        }

        let mut delay = policy.delay_for(attempt).max(last_delay);
        if let Some(hint) = error.retry_after() {
            delay = delay.max(hint.min(policy.max_delay));
        }
        warn!(
            attempt,
            max_attempts = attempts,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "retrying after failure"
        );
        tokio::time::sleep(delay).await;
        last_delay = delay;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(4), Duration::from_secs(8));
        assert_eq!(policy.delay_for(30), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_nth_attempt_with_growing_delays() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let recorded = calls.clone();

        let (value, attempts) = retry_with_backoff(&RetryPolicy::default(), |attempt| {
            recorded.lock().unwrap().push(Instant::now());
            async move {
                if attempt < 4 {
                    Err(ExtractionError::Timeout)
                } else {
                    Ok("offer")
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(value, "offer");
        assert_eq!(attempts, 4);
        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 4);
        let gaps: Vec<Duration> = calls.windows(2).map(|w| w[1] - w[0]).collect();
        assert!(gaps.windows(2).all(|g| g[0] <= g[1]));
        assert!(gaps[0] >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_stops_immediately() {
        let mut calls = 0;
        let err = retry_with_backoff(&RetryPolicy::default(), |_| {
            calls += 1;
            async { Err::<(), _>(ExtractionError::Unauthorized { status: 401 }) }
        })
        .await
        .unwrap_err();

        assert_eq!(calls, 1);
        assert!(matches!(err, RetryError::Fatal { attempt: 1, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_reports_attempts() {
        let policy = RetryPolicy {
            max_attempts: 3,
            ..RetryPolicy::default()
        };
        let started = Instant::now();
        let err = retry_with_backoff(&policy, |_| async {
            Err::<(), _>(ExtractionError::Transport("connection reset".into()))
        })
        .await
        .unwrap_err();

        assert_eq!(err.attempts(), 3);
        assert!(matches!(err.into_inner(), ExtractionError::Transport(_)));
        // 1 s + 2 s of backoff between three calls.
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(3) && waited < Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_hint_lengthens_delay() {
        let started = Instant::now();
        let _ = retry_with_backoff(&RetryPolicy::default(), |attempt| async move {
            if attempt == 1 {
                Err(ExtractionError::RateLimited {
                    retry_after: Some(Duration::from_secs(7)),
                })
            } else {
                Ok(())
            }
        })
        .await
        .unwrap();

        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(7) && waited < Duration::from_secs(8));
    }
}
