use crate::error::{Error, Result, TaskFailure};
use crate::executor::panic_handler::catch_failure;
use crate::executor::TaskId;
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Lifecycle of a submitted task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }
}

type Listener<T> = Box<dyn FnOnce(&ResultHandle<T>) + Send>;

struct Slot<T> {
    state: TaskState,
    value: Option<T>,
    failure: Option<TaskFailure>,
    listeners: Vec<Listener<T>>,
}

struct Shared<T> {
    id: TaskId,
    slot: Mutex<Slot<T>>,
    done: Condvar,
    interrupt: Arc<AtomicBool>,
}

enum Outcome<T> {
    Value(T),
    Failed(TaskFailure),
    Cancelled,
}

/// The eventual outcome of one task.
///
/// Cloning a handle is cheap; all clones observe the same task. A task's
/// error is stored here and only surfaces through [`get`](Self::get). A
/// caller that never asks for the result never sees the failure, apart from
/// the pool's failure counter and log output.
pub struct ResultHandle<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for ResultHandle<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> fmt::Debug for ResultHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultHandle")
            .field("id", &self.id())
            .field("state", &self.state())
            .finish()
    }
}

impl<T> ResultHandle<T> {
    pub(crate) fn new(id: TaskId) -> Self {
        Self {
            shared: Arc::new(Shared {
                id,
                slot: Mutex::new(Slot {
                    state: TaskState::Pending,
                    value: None,
                    failure: None,
                    listeners: Vec::new(),
                }),
                done: Condvar::new(),
                interrupt: Arc::new(AtomicBool::new(false)),
            }),
        }
    }

    pub fn id(&self) -> TaskId {
        self.shared.id
    }

    pub fn state(&self) -> TaskState {
        self.shared.slot.lock().state
    }

    pub fn is_done(&self) -> bool {
        self.state().is_terminal()
    }

    pub fn is_cancelled(&self) -> bool {
        self.state() == TaskState::Cancelled
    }

    /// Whether a cancel with `may_interrupt` reached the task while it ran.
    pub fn is_interrupted(&self) -> bool {
        self.shared.interrupt.load(Ordering::Acquire)
    }

    /// The captured failure, without blocking.
    pub fn failure(&self) -> Option<TaskFailure> {
        self.shared.slot.lock().failure.clone()
    }

    /// Block until the handle reaches a terminal state.
    pub fn wait(&self) {
        let mut slot = self.shared.slot.lock();
        while !slot.state.is_terminal() {
            self.shared.done.wait(&mut slot);
        }
    }

    /// Block for at most `timeout`; returns whether the handle is terminal.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.wait_deadline(deadline),
            None => {
                self.wait();
                true
            }
        }
    }

    pub(crate) fn wait_deadline(&self, deadline: Instant) -> bool {
        let mut slot = self.shared.slot.lock();
        while !slot.state.is_terminal() {
            if self.shared.done.wait_until(&mut slot, deadline).timed_out() {
                return slot.state.is_terminal();
            }
        }
        true
    }

    pub(crate) fn interrupt_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shared.interrupt)
    }

    /// `Pending -> Running`. Fails if the handle was cancelled first.
    pub(crate) fn start(&self) -> bool {
        let mut slot = self.shared.slot.lock();
        if slot.state != TaskState::Pending {
            return false;
        }
        slot.state = TaskState::Running;
        true
    }
}

impl<T: Send + 'static> ResultHandle<T> {
    /// An already-completed handle.
    pub fn completed(value: T) -> Self {
        let handle = Self::new(TaskId::DETACHED);
        handle.set_value(value);
        handle
    }

    /// An already-failed handle.
    pub fn failed(cause: anyhow::Error) -> Self {
        let handle = Self::new(TaskId::DETACHED);
        handle.set_failure(TaskFailure::new(cause));
        handle
    }

    /// Block until the task finishes and return its value.
    ///
    /// Returns [`Error::Execution`] wrapping the task's error if it failed
    /// and [`Error::Cancelled`] if it was cancelled.
    pub fn get(&self) -> Result<T>
    where
        T: Clone,
    {
        self.wait();
        self.resolve()
    }

    /// Like [`get`](Self::get) but gives up after `timeout` with
    /// [`Error::Timeout`]. The task itself keeps running.
    pub fn get_timeout(&self, timeout: Duration) -> Result<T>
    where
        T: Clone,
    {
        if !self.wait_timeout(timeout) {
            return Err(Error::Timeout(timeout));
        }
        self.resolve()
    }

    /// Cancel the task.
    ///
    /// A pending task never runs. A running task is marked cancelled at
    /// once and its eventual result discarded; with `may_interrupt` its
    /// [`CancellationToken`](crate::CancellationToken) also trips. Returns
    /// `false` if the handle had already finished.
    pub fn cancel(&self, may_interrupt: bool) -> bool {
        self.transition(|slot| {
            match slot.state {
                TaskState::Pending => {}
                TaskState::Running => {
                    if may_interrupt {
                        self.shared.interrupt.store(true, Ordering::Release);
                    }
                }
                _ => return false,
            }
            slot.state = TaskState::Cancelled;
            true
        })
    }

    /// Run `f` once the handle is terminal.
    ///
    /// The callback runs on whichever thread finishes the task, or right
    /// away on the caller if the handle is already terminal.
    pub fn on_complete<F>(&self, f: F)
    where
        F: FnOnce(&ResultHandle<T>) + Send + 'static,
    {
        {
            let mut slot = self.shared.slot.lock();
            if !slot.state.is_terminal() {
                slot.listeners.push(Box::new(f));
                return;
            }
        }
        f(self)
    }

    /// Chain a fallible continuation on success.
    ///
    /// Failures and cancellation of `self` pass through to the returned
    /// handle untouched.
    pub fn and_then<U, F>(&self, f: F) -> ResultHandle<U>
    where
        T: Clone,
        U: Send + 'static,
        F: FnOnce(T) -> anyhow::Result<U> + Send + 'static,
    {
        let downstream = ResultHandle::new(self.id());
        let target = downstream.clone();
        self.on_complete(move |upstream| match upstream.outcome() {
            Some(Outcome::Value(value)) => {
                if target.start() {
                    target.finish(catch_failure(|| f(value)));
                }
            }
            Some(Outcome::Failed(failure)) => {
                target.set_failure(failure);
            }
            Some(Outcome::Cancelled) | None => {
                target.cancel(false);
            }
        });
        downstream
    }

    pub fn then_apply<U, F>(&self, f: F) -> ResultHandle<U>
    where
        T: Clone,
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.and_then(move |value| Ok(f(value)))
    }

    pub fn then_accept<F>(&self, f: F) -> ResultHandle<()>
    where
        T: Clone,
        F: FnOnce(T) + Send + 'static,
    {
        self.and_then(move |value| {
            f(value);
            Ok(())
        })
    }

    pub fn then_run<F>(&self, f: F) -> ResultHandle<()>
    where
        T: Clone,
        F: FnOnce() + Send + 'static,
    {
        self.and_then(move |_| {
            f();
            Ok(())
        })
    }

    /// Turn a failure into a value (or a different failure).
    ///
    /// Successful values pass through; cancellation is not recovered.
    pub fn recover<F>(&self, f: F) -> ResultHandle<T>
    where
        T: Clone,
        F: FnOnce(&TaskFailure) -> anyhow::Result<T> + Send + 'static,
    {
        let downstream = ResultHandle::new(self.id());
        let target = downstream.clone();
        self.on_complete(move |upstream| match upstream.outcome() {
            Some(Outcome::Value(value)) => {
                target.set_value(value);
            }
            Some(Outcome::Failed(failure)) => {
                if target.start() {
                    target.finish(catch_failure(|| f(&failure)));
                }
            }
            Some(Outcome::Cancelled) | None => {
                target.cancel(false);
            }
        });
        downstream
    }

    pub(crate) fn set_value(&self, value: T) -> bool {
        self.transition(move |slot| {
            slot.value = Some(value);
            slot.state = TaskState::Completed;
            true
        })
    }

    pub(crate) fn set_failure(&self, failure: TaskFailure) -> bool {
        self.transition(move |slot| {
            slot.failure = Some(failure);
            slot.state = TaskState::Failed;
            true
        })
    }

    pub(crate) fn finish(&self, result: std::result::Result<T, TaskFailure>) -> bool {
        match result {
            Ok(value) => self.set_value(value),
            Err(failure) => self.set_failure(failure),
        }
    }

    // Single entry point for terminal transitions. Listeners run after the
    // lock is released so they may read the handle.
    fn transition(&self, apply: impl FnOnce(&mut Slot<T>) -> bool) -> bool {
        let listeners = {
            let mut slot = self.shared.slot.lock();
            if slot.state.is_terminal() || !apply(&mut *slot) {
                return false;
            }
            std::mem::take(&mut slot.listeners)
        };

        self.shared.done.notify_all();

        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(self))).is_err() {
                tracing::warn!(task = %self.id(), "completion listener panicked");
            }
        }
        true
    }

    fn outcome(&self) -> Option<Outcome<T>>
    where
        T: Clone,
    {
        let slot = self.shared.slot.lock();
        match slot.state {
            TaskState::Completed => slot.value.clone().map(Outcome::Value),
            TaskState::Failed => slot.failure.clone().map(Outcome::Failed),
            TaskState::Cancelled => Some(Outcome::Cancelled),
            TaskState::Pending | TaskState::Running => None,
        }
    }

    fn resolve(&self) -> Result<T>
    where
        T: Clone,
    {
        match self.outcome() {
            Some(Outcome::Value(value)) => Ok(value),
            Some(Outcome::Failed(failure)) => Err(Error::Execution(failure)),
            Some(Outcome::Cancelled) => Err(Error::Cancelled),
            None => Err(Error::illegal_state("handle is not complete")),
        }
    }
}
