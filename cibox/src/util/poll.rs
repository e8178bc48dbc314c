//! Bounded polling.
//!
//! Every wait in the lifecycle (container state, network address, ssh
//! banner) is a check repeated at a fixed interval until a deadline.

use std::future::Future;
use std::time::Duration;

use cibox_shared::errors::{CiboxError, CiboxResult};
use tokio::time::Instant;

/// Call `check` every `interval` until it yields a value or `timeout` elapses.
///
/// The check runs at least once, even with a zero timeout. `Ok(None)` means
/// "not yet"; an `Err` from the check aborts the wait immediately. Running
/// past the deadline returns `Timeout` carrying `what`.
pub async fn poll_until<T, F, Fut>(
    interval: Duration,
    timeout: Duration,
    what: &str,
    mut check: F,
) -> CiboxResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = CiboxResult<Option<T>>>,
{
    let deadline = Instant::now() + timeout;
    let mut attempts: u32 = 0;

    loop {
        attempts += 1;
        if let Some(value) = check().await? {
            tracing::trace!(what, attempts, "poll satisfied");
            return Ok(value);
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(CiboxError::Timeout(format!(
                "{} (gave up after {:?}, {} attempts)",
                what, timeout, attempts
            )));
        }

        tokio::time::sleep(interval.min(deadline - now)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_returns_first_ready_value() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let value = poll_until(
            Duration::from_millis(100),
            Duration::from_secs(10),
            "counter",
            move || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                Ok((n >= 3).then_some(n))
            },
        )
        .await
        .unwrap();

        assert_eq!(value, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_at_deadline() {
        let start = Instant::now();
        let err = poll_until(
            Duration::from_millis(100),
            Duration::from_secs(10),
            "network address",
            || async { Ok::<Option<()>, CiboxError>(None) },
        )
        .await
        .unwrap_err();

        assert!(matches!(err, CiboxError::Timeout(_)));
        assert!(err.to_string().contains("network address"));
        assert!(start.elapsed() >= Duration::from_secs(10));
        assert!(start.elapsed() < Duration::from_secs(11));
    }

    #[tokio::test]
    async fn test_zero_timeout_checks_once() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let value = poll_until(Duration::from_millis(100), Duration::ZERO, "once", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(Some("ready"))
        })
        .await
        .unwrap();

        assert_eq!(value, "ready");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_check_error_aborts() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let err = poll_until(
            Duration::from_millis(1),
            Duration::from_secs(10),
            "state",
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<Option<()>, _>(CiboxError::Operation("lxc-info failed".into()))
            },
        )
        .await
        .unwrap_err();

        assert!(matches!(err, CiboxError::Operation(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
