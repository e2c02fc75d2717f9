use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio::time::timeout;
use tracing::error;
use tracing::warn;

use crate::BackoffPolicy;
use crate::Error;
use crate::Result;

/// Runs `task` until it succeeds, retrying with exponential backoff.
///
/// Each attempt is bounded by `policy.timeout_ms`; the last error is returned
/// once `policy.max_retries` attempts have failed.
pub(crate) async fn task_with_timeout_and_exponential_backoff<F, T, P>(
    task: F,
    policy: &BackoffPolicy,
) -> Result<P>
where
    F: Fn() -> T,
    T: Future<Output = Result<P>>,
{
    let timeout_duration = Duration::from_millis(policy.timeout_ms);
    let max_delay = Duration::from_millis(policy.max_delay_ms);
    let mut delay = Duration::from_millis(policy.base_delay_ms);
    let mut last_error = Error::Fatal("task was never attempted".to_string());

    for attempt in 1..=policy.max_retries {
        match timeout(timeout_duration, task()).await {
            Ok(Ok(r)) => return Ok(r),
            Ok(Err(e)) => {
                warn!(attempt, "task failed: {:?}", e);
                last_error = e;
            }
            Err(_) => {
                warn!(attempt, ?timeout_duration, "task timed out");
                last_error = Error::Fatal(format!("task timed out after {timeout_duration:?}"));
            }
        }
        if attempt < policy.max_retries {
            sleep(delay).await;
            delay = (delay * 2).min(max_delay);
        }
    }
    Err(last_error)
}

/// Spawns a named task and tracks its handle; errors are logged.
pub(crate) fn spawn_task<Fut>(
    name: &str,
    task: Fut,
    handles: Option<&mut Vec<JoinHandle<()>>>,
) where
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let name = name.to_string();
    let handle = tokio::spawn(async move {
        if let Err(e) = task.await {
            error!("spawned task: {name} stopped or encountered an error: {:?}", e);
        }
    });

    if let Some(h) = handles {
        h.push(handle);
    }
}
