/// Retry policy with exponential backoff and jitter
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Initial backoff duration
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    pub max_backoff: Duration,
    /// Backoff multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Add random jitter to backoff (±30%)
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("Max retries ({attempts}) exceeded: {last_error}")]
    MaxRetriesExceeded { attempts: u32, last_error: E },
}

impl<E> RetryError<E> {
    /// Error returned by the final attempt.
    pub fn into_inner(self) -> E {
        match self {
            RetryError::MaxRetriesExceeded { last_error, .. } => last_error,
        }
    }
}

/// Exponential delay generator.
///
/// Unlike [`with_retry`] it never gives up: callers that loop forever (long-poll
/// readers) ask for the next delay after each failure and `reset` on success.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: RetryConfig,
    current: Duration,
    failures: u32,
}

impl Backoff {
    pub fn new(config: RetryConfig) -> Self {
        let current = config.initial_backoff;
        Self {
            config,
            current,
            failures: 0,
        }
    }

    /// Delay to wait before the next attempt; advances the curve.
    pub fn next_delay(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        let delay = calculate_backoff(self.current, self.config.jitter).min(self.config.max_backoff);
        self.current = Duration::from_millis(
            ((self.current.as_millis() as f64 * self.config.backoff_multiplier)
                .min(self.config.max_backoff.as_millis() as f64)) as u64,
        );
        delay
    }

    /// Consecutive failures since the last reset.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn reset(&mut self) {
        self.current = self.config.initial_backoff;
        self.failures = 0;
    }
}

/// Execute a future with retry logic
pub async fn with_retry<F, Fut, T, E>(config: RetryConfig, mut f: F) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_retries = config.max_retries;
    let mut backoff = Backoff::new(config);

    loop {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if backoff.failures() >= max_retries {
                    warn!(error = %e, "Max retries ({}) reached", max_retries);
                    return Err(RetryError::MaxRetriesExceeded {
                        attempts: max_retries,
                        last_error: e,
                    });
                }

                let delay = backoff.next_delay();

                warn!(
                    error = %e,
                    "Retry attempt {}/{}, waiting {:?}",
                    backoff.failures(),
                    max_retries,
                    delay
                );

                tokio::time::sleep(delay).await;
            }
        }
    }
}

fn calculate_backoff(base: Duration, jitter: bool) -> Duration {
    if jitter {
        let mut rng = rand::thread_rng();
        let jitter_factor = 1.0 + rng.gen_range(-0.3..0.3); // ±30%
        Duration::from_millis((base.as_millis() as f64 * jitter_factor) as u64)
    } else {
        base
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn no_jitter(initial_ms: u64, max_ms: u64) -> RetryConfig {
        RetryConfig {
            max_retries: 3,
            initial_backoff: Duration::from_millis(initial_ms),
            max_backoff: Duration::from_millis(max_ms),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    #[tokio::test]
    async fn test_retry_success_on_first_attempt() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = with_retry(RetryConfig::default(), move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, String>(42) }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_success_after_failures() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = with_retry(no_jitter(10, 1000), move || {
            let count = counter_clone.fetch_add(1, Ordering::SeqCst);
            async move {
                if count < 2 {
                    Err("temporary error")
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_keeps_last_error() {
        let config = RetryConfig {
            max_retries: 2,
            ..no_jitter(5, 100)
        };
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = with_retry(config, move || {
            let n = counter_clone.fetch_add(1, Ordering::SeqCst);
            async move { Err::<i32, _>(format!("failure {n}")) }
        })
        .await;

        match result {
            Err(RetryError::MaxRetriesExceeded { attempts, last_error }) => {
                assert_eq!(attempts, 2);
                assert_eq!(last_error, "failure 2");
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(counter.load(Ordering::SeqCst), 3); // Initial + 2 retries
    }

    #[tokio::test]
    async fn test_exponential_backoff() {
        let start = std::time::Instant::now();

        let _ = with_retry(no_jitter(10, 1000), || async { Err::<i32, _>("error") }).await;

        // 10ms + 20ms + 40ms
        assert!(start.elapsed() >= Duration::from_millis(70));
    }

    #[test]
    fn backoff_doubles_until_capped() {
        let mut backoff = Backoff::new(no_jitter(100, 350));

        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
        assert_eq!(backoff.next_delay(), Duration::from_millis(350));
        assert_eq!(backoff.next_delay(), Duration::from_millis(350));
        assert_eq!(backoff.failures(), 4);
    }

    #[test]
    fn backoff_reset_restarts_curve() {
        let mut backoff = Backoff::new(no_jitter(50, 1000));
        backoff.next_delay();
        backoff.next_delay();

        backoff.reset();

        assert_eq!(backoff.failures(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_millis(50));
    }

    #[test]
    fn jittered_delay_stays_within_bounds() {
        let mut backoff = Backoff::new(RetryConfig {
            jitter: true,
            ..no_jitter(1000, 10_000)
        });

        let delay = backoff.next_delay();
        assert!(delay >= Duration::from_millis(700));
        assert!(delay <= Duration::from_millis(1300));
    }
}
