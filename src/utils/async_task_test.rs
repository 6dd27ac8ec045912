use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;

use crate::async_task::sleep_or_cancel;
use crate::async_task::spawn_task;
use crate::async_task::task_with_exponential_backoff;
use crate::BackoffPolicy;
use crate::Error;
use crate::StoreError;

fn policy(max_retries: usize) -> BackoffPolicy {
    BackoffPolicy {
        enabled: true,
        max_retries,
        base_delay_ms: 10,
        max_delay_ms: 100,
    }
}

#[tokio::test(start_paused = true)]
async fn test_task_with_exponential_backoff_success() {
    let counter = Arc::new(AtomicU32::new(0));
    let counter_clone = counter.clone();
    let cancel = CancellationToken::new();

    let task = move || {
        let counter = counter_clone.clone();
        async move {
            let current = counter.fetch_add(1, Ordering::SeqCst);
            if current == 0 {
                Err(Error::Fatal("First attempt fails".to_string()))
            } else {
                Ok::<_, crate::Error>(current)
            }
        }
    };

    let result = task_with_exponential_backoff("test", task, policy(3), &cancel).await;

    assert_eq!(result.unwrap(), 1);
    assert_eq!(counter.load(Ordering::SeqCst), 2); // 1 failure + 1 success
}

#[tokio::test(start_paused = true)]
async fn test_task_with_exponential_backoff_max_retries() {
    let counter = Arc::new(AtomicU32::new(0));
    let counter_clone = counter.clone();
    let cancel = CancellationToken::new();

    let task = move || {
        let counter = counter_clone.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err::<u32, _>(Error::from(StoreError::Unavailable("down".to_string())))
        }
    };

    let result = task_with_exponential_backoff("test", task, policy(3), &cancel).await;

    assert!(result.is_err());
    assert_eq!(counter.load(Ordering::SeqCst), 4); // first try + 3 retries
}

#[tokio::test(start_paused = true)]
async fn test_task_with_exponential_backoff_stops_on_cancel() {
    let cancel = CancellationToken::new();
    cancel.cancel();

    let task = || async { Err::<u32, _>(Error::Fatal("never".to_string())) };
    let result = task_with_exponential_backoff("test", task, policy(0), &cancel).await;

    assert!(matches!(result, Err(Error::Dedup(crate::DedupError::Stopped))));
}

#[tokio::test]
async fn test_sleep_or_cancel_is_interrupted() {
    let cancel = CancellationToken::new();
    let child = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(5)).await;
        child.cancel();
    });

    let started = std::time::Instant::now();
    assert!(!sleep_or_cancel(&cancel, Duration::from_secs(30)).await);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_spawn_task() {
    let counter = Arc::new(AtomicU32::new(0));
    let counter_clone = counter.clone();

    let mut handles = Vec::new();
    spawn_task(
        "test_task",
        async move {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        },
        Some(&mut handles),
    );

    assert_eq!(handles.len(), 1);
    join_all(handles).await;
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_spawn_task_with_error() {
    let mut handles = Vec::new();
    spawn_task(
        "error_task",
        async move { Err::<(), _>(Error::Fatal("Task error".to_string())) },
        Some(&mut handles),
    );

    assert_eq!(handles.len(), 1);
    for r in join_all(handles).await {
        assert!(r.is_ok());
    }
}
