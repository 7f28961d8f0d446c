use std::future::Future;

use futures_util::StreamExt;
use futures_util::stream::FuturesUnordered;

/// Runs deferred tasks with at most `limit` in flight, returning results in
/// task order.
///
/// `limit` is clamped to `[1, tasks.len()]`. Fails fast: the first error
/// stops further scheduling, tasks already started are driven to completion
/// with their results discarded, and the error is returned.
pub async fn run_bounded<T, E, F, Fut>(tasks: Vec<F>, limit: usize) -> Result<Vec<T>, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let total = tasks.len();
    if total == 0 {
        return Ok(Vec::new());
    }
    let limit = limit.clamp(1, total);

    let launch = |(idx, task): (usize, F)| async move { (idx, task().await) };

    let mut results: Vec<Option<T>> = (0..total).map(|_| None).collect();
    let mut queued = tasks.into_iter().enumerate();
    let mut in_flight = FuturesUnordered::new();
    for next in queued.by_ref().take(limit) {
        in_flight.push(launch(next));
    }

    let mut first_error = None;
    while let Some((idx, outcome)) = in_flight.next().await {
        match outcome {
            Ok(value) => {
                if first_error.is_some() {
                    continue;
                }
                results[idx] = Some(value);
                if let Some(next) = queued.next() {
                    in_flight.push(launch(next));
                }
            }
            Err(e) => {
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(results.into_iter().flatten().collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn empty_list_returns_immediately() {
        let tasks: Vec<fn() -> std::future::Ready<Result<u8, ()>>> = Vec::new();
        assert_eq!(run_bounded(tasks, 4).await, Ok(vec![]));
    }

    #[tokio::test(start_paused = true)]
    async fn preserves_order_when_completion_is_reversed() {
        let tasks: Vec<_> = (0..5u64)
            .map(|i| {
                move || async move {
                    tokio::time::sleep(Duration::from_millis(100 - i * 10)).await;
                    Ok::<_, ()>(i)
                }
            })
            .collect();
        assert_eq!(run_bounded(tasks, 5).await, Ok(vec![0, 1, 2, 3, 4]));
    }

    #[tokio::test]
    async fn zero_limit_is_clamped_to_one() {
        let tasks: Vec<_> = (0..3)
            .map(|i| move || async move { Ok::<_, ()>(i * 2) })
            .collect();
        assert_eq!(run_bounded(tasks, 0).await, Ok(vec![0, 2, 4]));
    }

    #[tokio::test]
    async fn failure_stops_scheduling() {
        let started = Arc::new(AtomicUsize::new(0));
        let tasks: Vec<_> = (0..5)
            .map(|i| {
                let started = Arc::clone(&started);
                move || async move {
                    started.fetch_add(1, Ordering::SeqCst);
                    if i == 1 { Err(format!("task {i} failed")) } else { Ok(i) }
                }
            })
            .collect();

        let err = run_bounded(tasks, 1).await.unwrap_err();
        assert_eq!(err, "task 1 failed");
        assert_eq!(started.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_tasks_finish_after_failure() {
        let finished = Arc::new(AtomicUsize::new(0));
        let tasks: Vec<_> = (0..3u64)
            .map(|i| {
                let finished = Arc::clone(&finished);
                move || async move {
                    if i == 0 {
                        return Err("boom");
                    }
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    finished.fetch_add(1, Ordering::SeqCst);
                    Ok(i)
                }
            })
            .collect();

        assert_eq!(run_bounded(tasks, 3).await, Err("boom"));
        assert_eq!(finished.load(Ordering::SeqCst), 2);
    }

    fn paused_runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
            .unwrap()
    }

    proptest! {
        #[test]
        fn order_and_bound_hold(
            delays in proptest::collection::vec(0u64..200, 0..40),
            limit in 0usize..12,
        ) {
            let rt = paused_runtime();
            let active = Arc::new(AtomicUsize::new(0));
            let peak = Arc::new(AtomicUsize::new(0));
            let n = delays.len();

            let tasks: Vec<_> = delays
                .into_iter()
                .enumerate()
                .map(|(i, delay)| {
                    let active = Arc::clone(&active);
                    let peak = Arc::clone(&peak);
                    move || async move {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                        active.fetch_sub(1, Ordering::SeqCst);
                        Ok::<_, ()>(i)
                    }
                })
                .collect();

            let out = rt.block_on(run_bounded(tasks, limit)).unwrap();
            prop_assert_eq!(out, (0..n).collect::<Vec<_>>());
            prop_assert!(peak.load(Ordering::SeqCst) <= limit.max(1));
        }
    }
}
