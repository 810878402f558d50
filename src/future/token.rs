//! Cooperative cancellation for running tasks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Flag a running task polls to learn it should stop early.
///
/// A token trips when the task's handle is cancelled with
/// `may_interrupt = true` or when the owning pool receives
/// [`shutdown_now`](crate::WorkerPool::shutdown_now). Nothing stops a task
/// that never looks at its token: interruption is a contract with the
/// task body, not something the pool can enforce.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    task: Arc<AtomicBool>,
    pool: Option<Arc<AtomicBool>>,
}

impl CancellationToken {
    /// A standalone token, not tied to any pool.
    pub fn new() -> Self {
        Self {
            task: Arc::new(AtomicBool::new(false)),
            pool: None,
        }
    }

    pub(crate) fn for_task(task: Arc<AtomicBool>, pool: Arc<AtomicBool>) -> Self {
        Self {
            task,
            pool: Some(pool),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.task.load(Ordering::Acquire)
            || self
                .pool
                .as_ref()
                .map_or(false, |pool| pool.load(Ordering::Acquire))
    }

    pub fn cancel(&self) {
        self.task.store(true, Ordering::Release);
    }

    /// `Err` once the token has tripped, for use with `?` at safe points.
    pub fn check(&self) -> anyhow::Result<()> {
        if self.is_cancelled() {
            anyhow::bail!("task interrupted");
        }
        Ok(())
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}
