use super::task::TaskId;
use crate::error::TaskFailure;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};

/// What the pool does when a task body panics.
///
/// Either way the panic is captured into the task's handle and the worker
/// moves on to the next task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PanicStrategy {
    Isolate,
    #[default]
    LogAndContinue,
}

#[derive(Debug)]
pub struct PanicHandler {
    strategy: PanicStrategy,
    panic_count: AtomicUsize,
}

impl PanicHandler {
    pub fn new(strategy: PanicStrategy) -> Self {
        Self {
            strategy,
            panic_count: AtomicUsize::new(0),
        }
    }

    /// Run a task body, turning both returned errors and panics into a
    /// [`TaskFailure`].
    pub(crate) fn execute<F, R>(&self, task: TaskId, f: F) -> Result<R, TaskFailure>
    where
        F: FnOnce() -> anyhow::Result<R>,
    {
        match catch_unwind(AssertUnwindSafe(f)) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => {
                tracing::debug!(task = %task, error = %err, "task returned an error");
                Err(TaskFailure::new(err))
            }
            Err(payload) => {
                self.panic_count.fetch_add(1, Ordering::Relaxed);
                let info = PanicInfo::from_payload(payload);

                match self.strategy {
                    PanicStrategy::Isolate => {}
                    PanicStrategy::LogAndContinue => {
                        tracing::warn!(task = %task, message = %info.message, "task panicked");
                    }
                }

                Err(TaskFailure::from_panic(info.message))
            }
        }
    }

    pub fn panic_count(&self) -> usize {
        self.panic_count.load(Ordering::Relaxed)
    }

    pub fn reset_count(&self) {
        self.panic_count.store(0, Ordering::Relaxed);
    }

    pub fn strategy(&self) -> PanicStrategy {
        self.strategy
    }
}

impl Default for PanicHandler {
    fn default() -> Self {
        Self::new(PanicStrategy::default())
    }
}

/// Panic-safe call for code running outside a pool (handle continuations).
pub(crate) fn catch_failure<F, R>(f: F) -> Result<R, TaskFailure>
where
    F: FnOnce() -> anyhow::Result<R>,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result.map_err(TaskFailure::new),
        Err(payload) => Err(TaskFailure::from_panic(
            PanicInfo::from_payload(payload).message,
        )),
    }
}

#[derive(Debug, Clone)]
pub struct PanicInfo {
    pub message: String,
}

impl PanicInfo {
    fn from_payload(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };

        Self { message }
    }
}
