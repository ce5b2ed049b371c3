use std::future::Future;
use std::time::Duration;

use super::store::StoreError;

/// Bounded retry with a fixed delay, for single store writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay: Duration::from_millis(1000),
        }
    }
}

/// Runs `op`, re-running it after `policy.delay` while it fails with a
/// transient error and retries remain. Permanent errors return at once.
pub async fn with_retry<T, F, Fut>(policy: RetryPolicy, mut op: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut retries_left = policy.max_retries;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && retries_left > 0 => {
                retries_left -= 1;
                log::warn!(
                    "Transient store error ({err}); retrying in {:?}, {retries_left} retries left",
                    policy.delay
                );
                tokio::time::sleep(policy.delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}
