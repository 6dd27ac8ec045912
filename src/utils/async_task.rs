use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing::warn;

use crate::backoff::backoff_delay;
use crate::BackoffPolicy;
use crate::DedupError;
use crate::Error;
use crate::Result;

/// Sleeps for `duration` unless `cancel` fires first.
///
/// Returns `false` when the sleep was interrupted.
pub(crate) async fn sleep_or_cancel(
    cancel: &CancellationToken,
    duration: Duration,
) -> bool {
    if duration.is_zero() {
        return !cancel.is_cancelled();
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = sleep(duration) => true,
    }
}

/// Runs `task` until it succeeds, sleeping a jittered exponential backoff
/// between failures. Gives up with the last error once `policy` forbids
/// another attempt; returns `DedupError::Stopped` when cancelled.
pub(crate) async fn task_with_exponential_backoff<F, T, P>(
    name: &str,
    task: F,
    policy: BackoffPolicy,
    cancel: &CancellationToken,
) -> Result<P>
where
    F: Fn() -> T,
    T: Future<Output = Result<P>>,
{
    let mut failures = 0;
    loop {
        let error = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DedupError::Stopped.into()),
            r = task() => match r {
                Ok(r) => return Ok(r),
                Err(e) => e,
            },
        };

        failures += 1;
        if !policy.allows_retry(failures) {
            warn!("{name} failed after {failures} attempts: {error}");
            return Err(error);
        }

        let delay = backoff_delay(&policy, failures, &mut rand::thread_rng());
        warn!(attempt = failures, delay = ?delay.total(), "{name} failed: {error}");
        if !sleep_or_cancel(cancel, delay.total()).await {
            return Err(DedupError::Stopped.into());
        }
    }
}

// Helper function to spawn tasks and track their JoinHandles
pub(crate) fn spawn_task<F>(
    name: &str,
    task: F,
    handles: Option<&mut Vec<JoinHandle<()>>>,
) where
    F: Future<Output = Result<()>> + Send + 'static,
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

/// Maps a panicked or aborted task into the crate error type.
pub(crate) async fn join_task(handle: JoinHandle<()>) -> Result<()> {
    handle.await.map_err(Error::from)
}
