use anyhow::{anyhow, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    /// Retry immediately.
    #[default]
    None,
    /// Same delay before every retry.
    Fixed,
    /// Delay doubles after every failed attempt.
    Exponential,
}

/// How many times an operation is attempted and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub backoff: Backoff,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, backoff: Backoff, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
            delay,
        }
    }

    pub fn once() -> Self {
        Self::new(1, Backoff::None, Duration::ZERO)
    }

    /// Delay to wait after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: usize) -> Duration {
        match self.backoff {
            Backoff::None => Duration::ZERO,
            Backoff::Fixed => self.delay,
            Backoff::Exponential => {
                let shift = attempt.saturating_sub(1).min(16) as u32;
                self.delay.saturating_mul(1u32 << shift)
            }
        }
    }

    /// Runs `op` until it succeeds or the attempts are exhausted, returning the
    /// last error. `op` receives the 1-based attempt number.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut last_error = anyhow!("{}: no attempts made", label);

        for attempt in 1..=self.max_attempts {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!(
                        "{} failed (attempt {}/{}): {:#}",
                        label, attempt, self.max_attempts, e
                    );
                    last_error = e;
                }
            }

            if attempt < self.max_attempts {
                let delay = self.delay_after(attempt);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
        }

        Err(last_error.context(format!(
            "{} still failing after {} attempts",
            label, self.max_attempts
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_stops_at_first_success() {
        let calls = AtomicUsize::new(0);
        let policy = RetryPolicy::new(3, Backoff::None, Duration::ZERO);

        let result = policy
            .run("op", |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 2 {
                        Err(anyhow!("boom"))
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(result, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_exhausts_attempts_and_returns_last_error() {
        let calls = AtomicUsize::new(0);
        let policy = RetryPolicy::new(2, Backoff::None, Duration::ZERO);

        let err = policy
            .run("op", |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { Err::<(), _>(anyhow!("failure {}", attempt)) }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(format!("{:#}", err).contains("failure 2"));
    }

    #[test]
    fn test_zero_attempts_is_clamped_to_one() {
        assert_eq!(RetryPolicy::new(0, Backoff::None, Duration::ZERO).max_attempts, 1);
    }

    #[test]
    fn test_backoff_delays() {
        let base = Duration::from_millis(100);
        let fixed = RetryPolicy::new(4, Backoff::Fixed, base);
        assert_eq!(fixed.delay_after(3), base);

        let exp = RetryPolicy::new(4, Backoff::Exponential, base);
        assert_eq!(exp.delay_after(1), Duration::from_millis(100));
        assert_eq!(exp.delay_after(2), Duration::from_millis(200));
        assert_eq!(exp.delay_after(3), Duration::from_millis(400));

        let none = RetryPolicy::new(4, Backoff::None, base);
        assert_eq!(none.delay_after(2), Duration::ZERO);
    }
}
