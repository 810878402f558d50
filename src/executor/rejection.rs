//! What happens to a task the pool cannot admit.

use super::pool::PoolShared;
use super::task::Task;
use crate::error::Error;
use std::sync::Arc;

/// Policy bound to a pool at construction, applied when the queue is full
/// and no more workers may be started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RejectionPolicy {
    /// Refuse with [`Error::Rejected`].
    #[default]
    Abort,
    /// Run the task on the submitting thread. Slows producers down to the
    /// pool's pace.
    CallerRuns,
    /// Drop the task. Its handle becomes `Cancelled`.
    Discard,
    /// Evict the oldest queued task (cancelling its handle) and queue the
    /// new one in its place.
    DiscardOldest,
}

/// A task the pool refused, handed back still unaborted.
///
/// Whoever holds it decides when the task's handle turns `Cancelled`.
#[derive(Debug)]
pub(crate) struct Refused {
    pub(crate) error: Error,
    pub(crate) task: Task,
}

impl Refused {
    pub(crate) fn new(task: Task, error: Error) -> Self {
        Self { error, task }
    }

    /// Cancel the task's handle and give back the admission error.
    pub(crate) fn abort(self) -> Error {
        self.task.abort();
        self.error
    }
}

impl RejectionPolicy {
    /// Apply the policy to a task that found the pool full.
    ///
    /// Tasks the policy refuses come back in [`Refused`]; discarded and
    /// evicted ones are aborted here.
    pub(crate) fn reject(self, task: Task, pool: &Arc<PoolShared>) -> Result<(), Refused> {
        pool.metrics.record_rejected();

        match self {
            RejectionPolicy::Abort => {
                tracing::debug!(task = %task.id, "rejected (abort policy)");
                let error = Error::rejected(format!(
                    "{} rejected: queue full and all {} workers busy",
                    task.id, pool.config.max_workers
                ));
                Err(Refused::new(task, error))
            }
            RejectionPolicy::CallerRuns => {
                if !pool.is_running() {
                    return Err(Refused::new(task, Error::rejected("pool is shutting down")));
                }
                tracing::debug!(task = %task.id, "pool saturated, running on caller");
                pool.run_task(task, false);
                Ok(())
            }
            RejectionPolicy::Discard => {
                tracing::debug!(task = %task.id, "discarded (discard policy)");
                task.abort();
                pool.metrics.record_cancelled(1);
                Ok(())
            }
            RejectionPolicy::DiscardOldest => match pool.queue.rotate(task) {
                Ok(evicted) => {
                    tracing::debug!(task = %evicted.id, "evicted oldest queued task");
                    evicted.abort();
                    pool.metrics.record_cancelled(1);
                    Ok(())
                }
                Err(task) => Err(Refused::new(task, Error::rejected("pool is shutting down"))),
            },
        }
    }
}
