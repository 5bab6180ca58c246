//! Bounded-concurrency fan-out/fan-in
//!
//! [`ParallelRunner`] spawns submitted tasks onto the tokio runtime, lets at
//! most N of them run at once, and hands their results back in arrival order.
//! The first task error stops result delivery and prevents tasks that have
//! not started yet from running; tasks already running are left to finish.
//!
//! [`ListAggregator`] and [`ValueAggregator`] are the two ways the engine
//! drives a runner.

mod aggregate;

pub use aggregate::{ListAggregator, ValueAggregator};

use crate::error::RunnerError;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

/// Default number of tasks a runner lets run at the same time.
pub const DEFAULT_PARALLELISM: usize = 10;

/// First-error slot shared between a runner and its spawned tasks.
#[derive(Default)]
struct FirstError {
    error: Mutex<Option<anyhow::Error>>,
}

impl FirstError {
    /// Record `err` unless an error was already recorded. Returns true when recorded.
    fn record(&self, err: anyhow::Error) -> bool {
        let mut slot = self.error.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(err);
        true
    }

    fn is_set(&self) -> bool {
        self.error.lock().is_some()
    }

    fn take(&self) -> Option<anyhow::Error> {
        self.error.lock().take()
    }
}

/// Stops a runner from outside, e.g. from a signal handler while the
/// runner is being drained.
#[derive(Clone)]
pub struct StopHandle {
    token: CancellationToken,
    first_error: Arc<FirstError>,
}

impl StopHandle {
    /// Record `err` unless an error was already recorded, then cancel the runner.
    pub fn stop(&self, err: impl Into<anyhow::Error>) {
        if self.first_error.record(err.into()) {
            tracing::debug!("Stopping parallel runner");
        }
        self.token.cancel();
    }
}

/// Runs tasks producing `T` with bounded parallelism.
pub struct ParallelRunner<T: 'static> {
    semaphore: Arc<Semaphore>,
    token: CancellationToken,
    tasks: JoinSet<Option<T>>,
    first_error: Arc<FirstError>,
}

impl<T: Send + 'static> ParallelRunner<T> {
    /// Create a runner allowing `max_running` concurrent tasks.
    ///
    /// Cancelling `parent` stops scheduling of tasks that have not started.
    pub fn new(parent: &CancellationToken, max_running: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_running.max(1))),
            token: parent.child_token(),
            tasks: JoinSet::new(),
            first_error: Arc::new(FirstError::default()),
        }
    }

    /// A runner for another result type sharing this runner's concurrency budget.
    ///
    /// Stopping this runner also stops the sub-runner; the reverse is not true.
    pub fn sub_runner<U: Send + 'static>(&self) -> ParallelRunner<U> {
        ParallelRunner {
            semaphore: self.semaphore.clone(),
            token: self.token.child_token(),
            tasks: JoinSet::new(),
            first_error: Arc::new(FirstError::default()),
        }
    }

    /// Submit a task. Does not wait for a free slot.
    pub fn run<F>(&mut self, task: F)
    where
        F: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let semaphore = self.semaphore.clone();
        let token = self.token.clone();
        let first_error = self.first_error.clone();

        self.tasks.spawn(async move {
            let _permit = tokio::select! {
                biased;
                _ = token.cancelled() => return None,
                permit = semaphore.acquire_owned() => permit.ok()?,
            };
            // Another task may have failed while we were waiting for a slot
            if token.is_cancelled() {
                return None;
            }

            match task.await {
                Ok(value) => Some(value),
                Err(err) => {
                    if first_error.record(err) {
                        tracing::debug!("Stopping parallel runner after task error");
                        token.cancel();
                    }
                    None
                }
            }
        });
    }

    /// Stop the runner, recording `err` unless an error was already recorded.
    pub fn stop(&self, err: impl Into<anyhow::Error>) {
        self.stop_handle().stop(err);
    }

    /// A handle stopping this runner that can outlive borrows of it.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            token: self.token.clone(),
            first_error: self.first_error.clone(),
        }
    }

    /// Whether the runner has been stopped by an error or a cancellation.
    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Next result in arrival order.
    ///
    /// Returns `None` once every task has completed, or as soon as an error
    /// has been recorded or the runner has been cancelled.
    pub async fn next(&mut self) -> Option<T> {
        loop {
            if self.first_error.is_set() {
                return None;
            }

            let joined = tokio::select! {
                biased;
                _ = self.token.cancelled() => {
                    self.first_error.record(RunnerError::Cancelled.into());
                    return None;
                }
                joined = self.tasks.join_next() => joined,
            };

            match joined {
                None => return None,
                Some(Ok(Some(value))) => return Some(value),
                Some(Ok(None)) => continue,
                Some(Err(err)) => self.on_join_error(err),
            }
        }
    }

    /// Drain every result, returning them in arrival order or the first error.
    pub async fn collect(&mut self) -> anyhow::Result<Vec<T>> {
        let mut results = Vec::new();
        while let Some(value) = self.next().await {
            results.push(value);
        }
        match self.take_err() {
            Some(err) => Err(err),
            None => Ok(results),
        }
    }

    /// The first recorded error, if any. Leaves the slot empty.
    pub fn take_err(&mut self) -> Option<anyhow::Error> {
        self.first_error.take()
    }

    fn on_join_error(&mut self, err: JoinError) {
        if err.is_panic() {
            let message = panic_message(err.into_panic());
            tracing::error!("A runner task panicked: {}", message);
            self.stop(RunnerError::TaskPanicked(message));
        }
    }
}

impl<T: 'static> Drop for ParallelRunner<T> {
    fn drop(&mut self) {
        // In-flight tasks run to completion, their results are discarded
        self.tasks.detach_all();
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_collects_every_result() {
        let mut runner = ParallelRunner::new(&CancellationToken::new(), 3);
        for i in 0..20 {
            runner.run(async move { Ok(i) });
        }
        let mut results = runner.collect().await.unwrap();
        results.sort();
        assert_eq!(results, (0..20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_empty_runner_completes() {
        let mut runner: ParallelRunner<u8> = ParallelRunner::new(&CancellationToken::new(), 2);
        assert!(runner.collect().await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_respects_parallelism() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut runner = ParallelRunner::new(&CancellationToken::new(), 2);

        for _ in 0..10 {
            let running = running.clone();
            let peak = peak.clone();
            runner.run(async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            });
        }
        runner.collect().await.unwrap();
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_first_error_is_reported() {
        let mut runner = ParallelRunner::new(&CancellationToken::new(), 1);
        runner.run(async { Ok(1) });
        runner.run(async { Err(anyhow::anyhow!("first failure")) });
        runner.run(async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Err(anyhow::anyhow!("second failure"))
        });

        let err = runner.collect().await.unwrap_err();
        assert_eq!(err.to_string(), "first failure");
    }

    #[tokio::test]
    async fn test_error_skips_tasks_not_started() {
        let started = Arc::new(AtomicUsize::new(0));
        let mut runner = ParallelRunner::new(&CancellationToken::new(), 1);

        runner.run(async { Err(anyhow::anyhow!("boom")) });
        for _ in 0..5 {
            let started = started.clone();
            runner.run(async move {
                started.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }

        assert!(runner.collect().await.is_err());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(started.load(Ordering::SeqCst) <= 1);
    }

    #[tokio::test]
    async fn test_panic_becomes_error() {
        let mut runner: ParallelRunner<u8> = ParallelRunner::new(&CancellationToken::new(), 2);
        runner.run(async {
            let crashed: Option<u8> = None;
            Ok(crashed.expect("plugin crashed"))
        });

        let err = runner.collect().await.unwrap_err();
        match err.downcast_ref::<RunnerError>() {
            Some(RunnerError::TaskPanicked(message)) => assert_eq!(message, "plugin crashed"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_external_cancellation_stops_scheduling() {
        let parent = CancellationToken::new();
        let mut runner = ParallelRunner::new(&parent, 1);
        let started = Arc::new(AtomicUsize::new(0));

        parent.cancel();
        for _ in 0..3 {
            let started = started.clone();
            runner.run(async move {
                started.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }

        let err = runner.collect().await.unwrap_err();
        assert!(matches!(err.downcast_ref::<RunnerError>(), Some(RunnerError::Cancelled)));
        assert_eq!(started.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stop_records_reason() {
        let mut runner: ParallelRunner<u8> = ParallelRunner::new(&CancellationToken::new(), 1);
        runner.run(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(1)
        });
        runner.stop(RunnerError::Interrupted);

        let err = runner.collect().await.unwrap_err();
        assert!(matches!(err.downcast_ref::<RunnerError>(), Some(RunnerError::Interrupted)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_handle_interrupts_collect_in_progress() {
        let mut runner: ParallelRunner<u8> = ParallelRunner::new(&CancellationToken::new(), 2);
        runner.run(async { Ok(1) });
        runner.run(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(2)
        });

        let handle = runner.stop_handle();
        let collecting = tokio::spawn(async move { runner.collect().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.stop(RunnerError::Interrupted);
        handle.stop(anyhow::anyhow!("too late"));

        let err = tokio::time::timeout(Duration::from_secs(5), collecting)
            .await
            .unwrap()
            .unwrap()
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<RunnerError>(), Some(RunnerError::Interrupted)));
    }

    #[tokio::test]
    async fn test_sub_runner_shares_budget() {
        let parent: ParallelRunner<u8> = ParallelRunner::new(&CancellationToken::new(), 4);
        let mut child: ParallelRunner<String> = parent.sub_runner();
        child.run(async { Ok("ok".to_string()) });
        assert_eq!(child.collect().await.unwrap(), vec!["ok".to_string()]);

        parent.stop(RunnerError::Interrupted);
        assert!(child.is_stopped());
    }
}
