//! Retry logic for transient OBS request failures.
//!
//! Right after Identify, OBS answers requests with the not-ready status
//! (code 207) while collections are still loading. Those requests succeed
//! a moment later, so they are retried on a fixed short cadence.

use std::time::Duration;

use crate::error::ObsResult;

/// Retry delays for transient request failures.
const RETRY_DELAYS_MS: [u64; 3] = [1000, 1000, 1000];

/// Executes an OBS request with retry logic for transient failures.
///
/// Retries not-ready responses up to three times, one second apart. Hard
/// failures return immediately.
///
/// # Arguments
/// * `action` - Request name for logging
/// * `operation` - Closure that performs the request
pub(crate) async fn with_retry<T, F, Fut>(action: &str, mut operation: F) -> ObsResult<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = ObsResult<T>>,
{
    let mut last_error = None;
    for (attempt, &delay_ms) in std::iter::once(&0)
        .chain(RETRY_DELAYS_MS.iter())
        .enumerate()
    {
        if attempt > 0 {
            log::info!(
                "[Obs] Retrying {} (attempt {}/{}) after {}ms",
                action,
                attempt + 1,
                RETRY_DELAYS_MS.len() + 1,
                delay_ms
            );
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }

        match operation().await {
            Ok(r) => return Ok(r),
            Err(e) if e.is_transient() => {
                log::warn!("[Obs] {} not ready: {}", action, e);
                last_error = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_error.expect("retry loop should have set last_error"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ObsError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn not_ready() -> ObsError {
        ObsError::RequestFailed {
            request_type: "GetInputList".into(),
            code: 207,
            comment: "not ready".into(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_not_ready_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = with_retry("GetInputList", move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(not_ready())
                } else {
                    Ok(42u32)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_all_delays() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: ObsResult<u32> = with_retry("GetInputList", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(not_ready()) }
        })
        .await;

        assert!(result.is_err());
        // Initial attempt plus one per delay
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn hard_failures_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: ObsResult<u32> = with_retry("SetInputVolume", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(ObsError::NotConnected) }
        })
        .await;

        assert!(matches!(result, Err(ObsError::NotConnected)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
