//! Retry for transient container-runtime failures.
//!
//! `lxc-destroy` occasionally fails right after `lxc-stop` while the
//! runtime is still releasing the rootfs; a single delayed retry clears it.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one.
    pub max_attempts: u32,
    /// Fixed delay between attempts.
    pub delay: Duration,
}

impl RetryConfig {
    /// One attempt, then exactly one retry after `delay`.
    pub fn once_after(delay: Duration) -> Self {
        Self {
            max_attempts: 2,
            delay,
        }
    }
}

/// Run `operation` until it succeeds or `max_attempts` is reached.
///
/// The error of the last attempt is returned unchanged.
pub async fn retry_with_delay<T, E, F, Fut>(
    config: RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(
                        operation = %operation_name,
                        attempts = attempt,
                        "operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(e) => {
                if attempt >= config.max_attempts {
                    warn!(
                        operation = %operation_name,
                        attempts = attempt,
                        error = %e,
                        "operation failed after max attempts"
                    );
                    return Err(e);
                }

                warn!(
                    operation = %operation_name,
                    attempt = attempt,
                    max_attempts = config.max_attempts,
                    delay_ms = config.delay.as_millis() as u64,
                    error = %e,
                    "operation failed, will retry"
                );

                tokio::time::sleep(config.delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_succeeds_first_try() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let result: Result<u32, String> =
            retry_with_delay(RetryConfig::once_after(Duration::ZERO), "test", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(42)
            })
            .await;

        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_one_failure_then_success() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let result: Result<&str, String> =
            retry_with_delay(RetryConfig::once_after(Duration::ZERO), "test", move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err("busy".to_string())
                } else {
                    Ok("done")
                }
            })
            .await;

        assert_eq!(result, Ok("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let result: Result<(), String> =
            retry_with_delay(RetryConfig::once_after(Duration::ZERO), "test", move || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                Err(format!("failure {n}"))
            })
            .await;

        assert_eq!(result, Err("failure 1".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_between_attempts() {
        let start = tokio::time::Instant::now();
        let _: Result<(), String> =
            retry_with_delay(RetryConfig::once_after(Duration::from_secs(5)), "test", || async {
                Err("nope".to_string())
            })
            .await;

        assert!(start.elapsed() >= Duration::from_secs(5));
    }
}
