//! Runner-backed aggregation helpers

use super::{ParallelRunner, StopHandle};
use std::future::Future;

/// Fans out "produce a list" tasks and concatenates their output.
///
/// All-or-nothing: the first producer error discards every other result.
pub struct ListAggregator<T: Send + 'static> {
    runner: ParallelRunner<Vec<T>>,
}

impl<T: Send + 'static> ListAggregator<T> {
    pub fn new(runner: ParallelRunner<Vec<T>>) -> Self {
        Self { runner }
    }

    /// Register a producer. It starts as soon as a slot is free.
    pub fn push<F>(&mut self, producer: F)
    where
        F: Future<Output = anyhow::Result<Vec<T>>> + Send + 'static,
    {
        self.runner.run(producer);
    }

    /// A handle stopping the aggregation while [`Self::resources`] runs.
    pub fn stop_handle(&self) -> StopHandle {
        self.runner.stop_handle()
    }

    /// Wait for every producer and return the concatenated lists in arrival order.
    pub async fn resources(&mut self) -> anyhow::Result<Vec<T>> {
        let mut results = Vec::new();
        while let Some(list) = self.runner.next().await {
            results.extend(list);
        }
        match self.runner.take_err() {
            Some(err) => Err(err),
            None => Ok(results),
        }
    }
}

/// Fans out "produce one value" tasks.
///
/// A task returning `Ok(None)` was intentionally skipped and contributes
/// nothing to the output.
pub struct ValueAggregator<T: Send + 'static> {
    runner: ParallelRunner<Option<T>>,
}

impl<T: Send + 'static> ValueAggregator<T> {
    pub fn new(runner: ParallelRunner<Option<T>>) -> Self {
        Self { runner }
    }

    pub fn run<F>(&mut self, task: F)
    where
        F: Future<Output = anyhow::Result<Option<T>>> + Send + 'static,
    {
        self.runner.run(task);
    }

    /// Wait for every task, dropping skipped results, or return the first error.
    pub async fn wait(&mut self) -> anyhow::Result<Vec<T>> {
        let values = self.runner.collect().await?;
        Ok(values.into_iter().flatten().collect())
    }
}
