use crate::error::Result;
use log::warn;
use std::future::Future;
use std::time::Duration;

/// Bounded retry policy shared by every outbound call class
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: usize,
    /// Fixed pause between attempts
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, delay: Duration) -> Self {
        RetryPolicy {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error,
    /// or the attempts are exhausted
    pub async fn run<T, F, Fut>(&self, label: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.max_attempts => {
                    warn!(
                        "{} failed (attempt {}/{}), retrying: {}",
                        label, attempt, self.max_attempts, err
                    );
                    attempt += 1;
                    if !self.delay.is_zero() {
                        tokio::time::sleep(self.delay).await;
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::new(3, Duration::from_millis(250))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_retries_transient_failures_until_success() {
        let calls = AtomicUsize::new(0);
        let policy = RetryPolicy::new(3, Duration::ZERO);

        let value = policy
            .run("flaky", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(Error::ChatService("503".into()))
                } else {
                    Ok(7)
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicUsize::new(0);
        let policy = RetryPolicy::new(2, Duration::ZERO);

        let result: Result<()> = policy
            .run("down", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::EmbeddingService("timeout".into()))
            })
            .await;

        assert!(matches!(result, Err(Error::EmbeddingService(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_auth_failures_are_not_retried() {
        let calls = AtomicUsize::new(0);
        let policy = RetryPolicy::new(5, Duration::ZERO);

        let result: Result<()> = policy
            .run("auth", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::Auth {
                    service: crate::error::ServiceKind::Embedding,
                    message: "401".into(),
                })
            })
            .await;

        assert!(matches!(result, Err(Error::Auth { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
