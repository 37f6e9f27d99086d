//! Exponential backoff for transient embedding failures.

use std::future::Future;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Retry behavior for one provider.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubled on each subsequent one.
    #[serde(with = "crate::serde_millis", rename = "base_delay_ms")]
    pub base_delay: Duration,
    #[serde(with = "crate::serde_millis", rename = "max_delay_ms")]
    pub max_delay: Duration,
    /// Add 0-50% random jitter to each delay.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }
}

/// Final outcome of a retried operation.
#[derive(Debug, Clone)]
pub struct RetryResult<T, E> {
    pub result: Result<T, E>,
    /// Attempts made, 1 when the first call succeeded.
    pub attempts: u32,
    pub total_duration: Duration,
}

impl<T, E> RetryResult<T, E> {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }

    pub fn into_result(self) -> Result<T, E> {
        self.result
    }
}

/// Run `operation` until it succeeds, returns an error `should_retry`
/// rejects, or the retry budget is spent.
///
/// ```ignore
/// let out = execute_with_retry_async(&RetryConfig::default(), |e: &EmbeddingError| e.is_retryable(), |attempt| async move {
///     client.embed_batch(&texts).await
/// }).await;
/// ```
pub async fn execute_with_retry_async<T, E, R, F, Fut>(
    config: &RetryConfig,
    should_retry: R,
    mut operation: F,
) -> RetryResult<T, E>
where
    R: Fn(&E) -> bool,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let start = Instant::now();
    let mut attempt = 0;
    loop {
        match operation(attempt).await {
            Ok(value) => {
                return RetryResult {
                    result: Ok(value),
                    attempts: attempt + 1,
                    total_duration: start.elapsed(),
                };
            }
            Err(error) => {
                if attempt >= config.max_retries || !should_retry(&error) {
                    return RetryResult {
                        result: Err(error),
                        attempts: attempt + 1,
                        total_duration: start.elapsed(),
                    };
                }
                let delay = calculate_delay(config, attempt);
                debug!(attempt = attempt + 1, delay_ms = delay.as_millis() as u64, "retry_scheduled");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

fn calculate_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let base = config.base_delay.as_millis() as u64;
    let exponential = base.saturating_mul(2_u64.saturating_pow(attempt));
    let delay = exponential.min(config.max_delay.as_millis() as u64);

    if config.jitter {
        let jitter = fastrand::u64(0..=delay / 2);
        Duration::from_millis(delay + jitter)
    } else {
        Duration::from_millis(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryConfig {
        RetryConfig::default()
            .with_base_delay(Duration::from_millis(1))
            .with_jitter(false)
    }

    #[tokio::test]
    async fn retry_succeeds_eventually() {
        let calls = AtomicU32::new(0);
        let result = execute_with_retry_async(&fast().with_max_retries(3), |_: &String| true, |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err("not yet".to_string())
                } else {
                    Ok("success")
                }
            }
        })
        .await;

        assert!(result.succeeded());
        assert_eq!(result.attempts, 3);
        assert_eq!(result.into_result().unwrap(), "success");
    }

    #[tokio::test]
    async fn retry_stops_after_budget() {
        let result: RetryResult<(), String> =
            execute_with_retry_async(&fast().with_max_retries(2), |_| true, |_| async {
                Err("always fails".to_string())
            })
            .await;

        assert!(!result.succeeded());
        assert_eq!(result.attempts, 3);
    }

    #[tokio::test]
    async fn non_retryable_error_returns_immediately() {
        let result: RetryResult<(), String> =
            execute_with_retry_async(&fast().with_max_retries(5), |_| false, |_| async {
                Err("HTTP 401".to_string())
            })
            .await;

        assert_eq!(result.attempts, 1);
        assert_eq!(result.into_result().unwrap_err(), "HTTP 401");
    }

    #[test]
    fn delay_grows_and_caps() {
        let cfg = RetryConfig::default()
            .with_base_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(350))
            .with_jitter(false);
        assert_eq!(calculate_delay(&cfg, 0), Duration::from_millis(100));
        assert_eq!(calculate_delay(&cfg, 1), Duration::from_millis(200));
        assert_eq!(calculate_delay(&cfg, 2), Duration::from_millis(350));
        assert_eq!(calculate_delay(&cfg, 40), Duration::from_millis(350));
    }

    #[test]
    fn config_reads_millis() {
        let cfg: RetryConfig = serde_yaml::from_str(
            "max_retries: 1\nbase_delay_ms: 50\nmax_delay_ms: 500\njitter: false\n",
        )
        .unwrap();
        assert_eq!(cfg.base_delay, Duration::from_millis(50));
        assert_eq!(cfg.max_delay, Duration::from_millis(500));
    }
}
