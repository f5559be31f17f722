use crate::config::RetryPolicy;
use crate::error::StoreError;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut call: F,
) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(error) if error.is_transient() && attempt < max_attempts => {
                let backoff = retry_backoff(policy, attempt);
                warn!(
                    operation,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %error,
                    "store call failed, retrying"
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}

fn retry_backoff(policy: &RetryPolicy, attempt: u32) -> Duration {
    let capped = attempt.saturating_sub(1).min(5);
    Duration::from_millis(policy.initial_backoff_ms.saturating_mul(1 << capped))
}
