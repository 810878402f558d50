//! Task representation and execution.

use super::panic_handler::PanicHandler;
use crate::future::{CancellationToken, ResultHandle};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Unique identifier for a task within one pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    /// Id carried by handles that were never submitted anywhere.
    pub(crate) const DETACHED: TaskId = TaskId(0);

    pub(crate) const fn new(raw: u64) -> Self {
        TaskId(raw)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Per-pool id source
#[derive(Debug, Default)]
pub(crate) struct TaskIdGen {
    last: AtomicU64,
}

impl TaskIdGen {
    pub(crate) fn next(&self) -> TaskId {
        TaskId::new(self.last.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

/// What happened when a worker picked a task up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RunOutcome {
    Completed,
    Failed,
    /// Cancelled before it started; the body never ran.
    Skipped,
}

/// Everything a job needs from the pool while it runs
pub(crate) struct RunContext<'a> {
    pub(crate) interrupt: &'a Arc<AtomicBool>,
    pub(crate) panics: &'a PanicHandler,
}

/// Type-erased unit of work held by the queue and the timer.
pub(crate) trait Job: Send {
    fn run(self: Box<Self>, id: TaskId, ctx: &RunContext<'_>) -> RunOutcome;

    /// Drop the job without running it. Attached handles become `Cancelled`.
    fn abort(self: Box<Self>);
}

/// Internal task representation
pub(crate) struct Task {
    pub(crate) id: TaskId,
    job: Box<dyn Job>,
    pub(crate) created_at: Instant,
}

impl Task {
    pub(crate) fn new(id: TaskId, job: Box<dyn Job>) -> Self {
        Task {
            id,
            job,
            created_at: Instant::now(),
        }
    }

    /// A task that reports into `handle`.
    pub(crate) fn with_handle<T, F>(handle: ResultHandle<T>, body: F) -> Self
    where
        T: Send + 'static,
        F: FnOnce(&CancellationToken) -> anyhow::Result<T> + Send + 'static,
    {
        let id = handle.id();
        Self::new(id, Box::new(HandleJob { handle, body }))
    }

    /// A fire-and-forget task.
    pub(crate) fn detached<F>(id: TaskId, body: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self::new(id, Box::new(DetachedJob { body }))
    }

    pub(crate) fn run(self, ctx: &RunContext<'_>) -> RunOutcome {
        self.job.run(self.id, ctx)
    }

    pub(crate) fn abort(self) {
        tracing::trace!(task = %self.id, "task discarded before running");
        self.job.abort();
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .finish()
    }
}

struct HandleJob<T, F> {
    handle: ResultHandle<T>,
    body: F,
}

impl<T, F> Job for HandleJob<T, F>
where
    T: Send + 'static,
    F: FnOnce(&CancellationToken) -> anyhow::Result<T> + Send + 'static,
{
    fn run(self: Box<Self>, id: TaskId, ctx: &RunContext<'_>) -> RunOutcome {
        let HandleJob { handle, body } = *self;
        if !handle.start() {
            return RunOutcome::Skipped;
        }

        let token = CancellationToken::for_task(handle.interrupt_flag(), Arc::clone(ctx.interrupt));
        let result = ctx.panics.execute(id, || body(&token));
        let outcome = if result.is_ok() {
            RunOutcome::Completed
        } else {
            RunOutcome::Failed
        };

        if !handle.finish(result) {
            tracing::debug!(task = %id, "result dropped, handle was cancelled while running");
        }
        outcome
    }

    fn abort(self: Box<Self>) {
        self.handle.cancel(false);
    }
}

struct DetachedJob<F> {
    body: F,
}

impl<F> Job for DetachedJob<F>
where
    F: FnOnce() + Send + 'static,
{
    fn run(self: Box<Self>, id: TaskId, ctx: &RunContext<'_>) -> RunOutcome {
        let body = self.body;
        match ctx.panics.execute(id, || {
            body();
            Ok(())
        }) {
            Ok(()) => RunOutcome::Completed,
            Err(_) => RunOutcome::Failed,
        }
    }

    fn abort(self: Box<Self>) {}
}
