use std::future::Future;
use std::time::Duration;

use super::classification::ErrorClassification;
use super::types::MalsiftError;
use tracing::warn;

impl ErrorClassification {
    /// Exponential backoff for the given attempt (0-indexed), capped at 30s.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        Duration::from_secs(2u64.saturating_pow(attempt).min(30))
    }
}

/// Run an async operation, retrying errors classified as retryable up to
/// `max_retries` extra times.
pub async fn with_retry<F, Fut, T>(operation_name: &str, max_retries: u32, mut factory: F) -> Result<T, MalsiftError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, MalsiftError>>,
{
    let max_attempts = max_retries + 1;
    let mut attempt = 0;
    loop {
        match factory().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                let classification = e.classify();
                if !classification.retryable || attempt + 1 >= max_attempts {
                    if classification.retryable {
                        warn!(operation = operation_name, attempts = attempt + 1, "Max retries exhausted");
                    }
                    return Err(e);
                }

                let delay = classification.retry_delay(attempt);
                warn!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    max = max_attempts,
                    error_type = classification.error_type,
                    delay_secs = delay.as_secs(),
                    error = %e,
                    "Retrying after error"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_retry_delay_capped() {
        let class = MalsiftError::Network("reset".into()).classify();
        assert_eq!(class.retry_delay(0), Duration::from_secs(1));
        assert_eq!(class.retry_delay(2), Duration::from_secs(4));
        assert_eq!(class.retry_delay(10), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_recovers_from_network_error() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let result = with_retry("judge", 2, || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(MalsiftError::Network("reset".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_with_retry_non_retryable_fails_immediately() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let result = with_retry("judge", 3, || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(MalsiftError::Config("bad".into()))
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_gives_up_after_max() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let result = with_retry("judge", 2, || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(MalsiftError::Network("down".into()))
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
