//! Attempt-bounded retry for the REST pipeline. Grounded on
//! `arkin-core/src/utils/retry.rs`'s retry loop, simplified to a flat
//! attempt ceiling with no backoff delay: retries run back-to-back up to
//! `max_retries + 1` total attempts.

use tracing::warn;

/// Classifies a `reqwest::Error` as retryable. Timeouts and connection-level
/// errors (including resets) are transient; everything else is not.
pub fn is_transient(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

/// Runs `attempt` up to `max_retries + 1` times, stopping at the first
/// success or the first error `classify` reports as non-transient. Returns
/// the last error once attempts are exhausted.
pub async fn retry_transient<F, Fut, T>(
    max_retries: u64,
    mut attempt: F,
    mut classify: impl FnMut(&reqwest::Error) -> bool,
) -> Result<T, reqwest::Error>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, reqwest::Error>>,
{
    let total_attempts = max_retries + 1;
    let mut last_err = None;
    for attempt_no in 1..=total_attempts {
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !classify(&err) || attempt_no == total_attempts {
                    return Err(err);
                }
                warn!(target: "rest", attempt = attempt_no, total = total_attempts, "retrying after transient error: {err}");
                last_err = Some(err);
            }
        }
    }
    Err(last_err.expect("loop always runs at least once"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[tokio::test]
    async fn stops_at_first_success() {
        let calls = AtomicU64::new(0);
        let result: Result<u64, reqwest::Error> = retry_transient(
            3,
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move { Ok::<u64, reqwest::Error>(n) }
            },
            |_| true,
        )
        .await;
        assert_eq!(result.unwrap(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn caps_total_attempts_at_max_retries_plus_one() {
        let calls = AtomicU64::new(0);
        let client = reqwest::Client::new();
        let result: Result<(), reqwest::Error> = retry_transient(
            3,
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                let client = client.clone();
                async move { client.get("http://127.0.0.1:1").send().await.map(|_| ()) }
            },
            |_| true,
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }
}
