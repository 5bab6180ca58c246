//! Progress counting for detail reads

use std::sync::atomic::{AtomicU64, Ordering};

/// Sink advanced once per successfully read resource.
pub trait ProgressCounter: Send + Sync {
    fn inc(&self);
    fn value(&self) -> u64;
}

/// Thread-safe counter.
#[derive(Debug, Default)]
pub struct CountingProgress {
    count: AtomicU64,
}

impl CountingProgress {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressCounter for CountingProgress {
    fn inc(&self) {
        let count = self.count.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::trace!(count, "Progress");
    }

    fn value(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

/// Discards progress.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgress;

impl ProgressCounter for NoopProgress {
    fn inc(&self) {}

    fn value(&self) -> u64 {
        0
    }
}
