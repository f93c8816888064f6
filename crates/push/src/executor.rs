//! Traversal strategies for running independent push tasks.

use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};

/// How many tasks may be in flight at once.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Concurrency {
    /// One task at a time, in input order.
    Sequential,
    /// Every task at once.
    Unbounded,
    /// At most `n` tasks past the permit gate at any moment.
    Bounded(NonZeroUsize),
}

impl Concurrency {
    /// Bounded concurrency; a limit of 0 or 1 runs sequentially.
    pub fn bounded(limit: usize) -> Self {
        match NonZeroUsize::new(limit) {
            Some(n) if n.get() > 1 => Self::Bounded(n),
            _ => Self::Sequential,
        }
    }

    /// Run `task` for every item and return the outputs in input order.
    ///
    /// Tasks are spawned eagerly; under `Bounded` each waits for a semaphore
    /// permit before doing any work and releases it when it finishes, fails or
    /// is dropped. A failing task never cancels its siblings. Dropping the
    /// returned future aborts every spawned task.
    pub async fn run_all<I, T, F, Fut>(&self, items: Vec<I>, task: F) -> Vec<T>
    where
        I: Send + 'static,
        T: Send + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        match self {
            Self::Sequential => {
                let mut results = Vec::with_capacity(items.len());
                for item in items {
                    results.push(task(item).await);
                }
                results
            }
            Self::Unbounded => {
                let mut set = JoinSet::new();
                for (index, item) in items.into_iter().enumerate() {
                    let fut = task(item);
                    set.spawn(async move { (index, fut.await) });
                }
                collect_in_order(set).await
            }
            Self::Bounded(limit) => {
                let semaphore = Arc::new(Semaphore::new(limit.get()));
                let task = Arc::new(task);
                let mut set = JoinSet::new();
                for (index, item) in items.into_iter().enumerate() {
                    let semaphore = semaphore.clone();
                    let task = task.clone();
                    set.spawn(async move {
                        // The semaphore is never closed.
                        let _permit = semaphore.acquire_owned().await.ok();
                        (index, task(item).await)
                    });
                }
                collect_in_order(set).await
            }
        }
    }
}

impl Default for Concurrency {
    fn default() -> Self {
        Self::bounded(8)
    }
}

/// Join every task and restore input order. Dropping the set before it is
/// drained aborts the tasks still running.
async fn collect_in_order<T: 'static>(mut set: JoinSet<(usize, T)>) -> Vec<T> {
    let mut slots: Vec<Option<T>> = std::iter::repeat_with(|| None).take(set.len()).collect();
    while let Some(joined) = set.join_next().await {
        let (index, value) = join_result(joined);
        slots[index] = Some(value);
    }
    slots.into_iter().flatten().collect()
}

fn join_result<T>(result: Result<T, JoinError>) -> T {
    match result {
        Ok(value) => value,
        // Tasks are only aborted when the set is dropped, so a join error here carries a panic.
        Err(err) => std::panic::resume_unwind(err.into_panic()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Gauge {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    impl Gauge {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                current: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            })
        }

        fn enter(&self) {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
        }

        fn exit(&self) {
            self.current.fetch_sub(1, Ordering::SeqCst);
        }
    }

    async fn run_instrumented(concurrency: Concurrency, tasks: usize) -> (Vec<usize>, usize) {
        let gauge = Gauge::new();
        let task_gauge = gauge.clone();
        let results = concurrency
            .run_all((0..tasks).collect(), move |i| {
                let gauge = task_gauge.clone();
                async move {
                    gauge.enter();
                    tokio::time::sleep(Duration::from_millis((i % 3) as u64 + 1)).await;
                    gauge.exit();
                    i * 2
                }
            })
            .await;
        (results, gauge.peak.load(Ordering::SeqCst))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_bounded_never_exceeds_limit() {
        for limit in [2usize, 3, 5] {
            for tasks in [0usize, 1, 4, 17] {
                let (results, peak) = run_instrumented(Concurrency::bounded(limit), tasks).await;
                assert!(peak <= limit, "peak {peak} exceeded limit {limit}");
                assert_eq!(results, (0..tasks).map(|i| i * 2).collect::<Vec<_>>());
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_sequential_runs_one_at_a_time() {
        let (results, peak) = run_instrumented(Concurrency::Sequential, 6).await;
        assert_eq!(peak, 1);
        assert_eq!(results, vec![0, 2, 4, 6, 8, 10]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_unbounded_preserves_order() {
        let (results, _) = run_instrumented(Concurrency::Unbounded, 10).await;
        assert_eq!(results, (0..10).map(|i| i * 2).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_failures_do_not_cancel_siblings() {
        let results = Concurrency::bounded(2)
            .run_all(vec![1, 2, 3, 4], |i| async move {
                if i % 2 == 0 { Err(i) } else { Ok(i) }
            })
            .await;
        assert_eq!(results, vec![Ok(1), Err(2), Ok(3), Err(4)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_run_all_aborts_tasks() {
        for concurrency in [Concurrency::Unbounded, Concurrency::bounded(2)] {
            let finished = Arc::new(AtomicUsize::new(0));
            let task_finished = finished.clone();
            let run = concurrency.run_all((0..4).collect::<Vec<usize>>(), move |_| {
                let finished = task_finished.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    finished.fetch_add(1, Ordering::SeqCst);
                }
            });

            let timed_out = tokio::time::timeout(Duration::from_millis(10), run).await;
            assert!(timed_out.is_err());
            tokio::time::sleep(Duration::from_millis(200)).await;
            assert_eq!(finished.load(Ordering::SeqCst), 0, "{concurrency:?}");
        }
    }

    #[test]
    fn test_bounded_constructor() {
        assert_eq!(Concurrency::bounded(0), Concurrency::Sequential);
        assert_eq!(Concurrency::bounded(1), Concurrency::Sequential);
        assert_eq!(
            Concurrency::bounded(4),
            Concurrency::Bounded(NonZeroUsize::new(4).unwrap())
        );
    }
}
