use super::panic_handler::PanicHandler;
use super::queue::TaskQueue;
use super::rejection::Refused;
use super::task::{RunContext, RunOutcome, Task, TaskId, TaskIdGen};
use super::worker::{Worker, WorkerId};
use crate::config::PoolConfig;
use crate::error::{Error, Result};
use crate::future::{CancellationToken, ResultHandle};
use crate::telemetry::{Metrics, PoolMetrics};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

/// Lifecycle of a pool. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    /// Accepting and running tasks.
    Running,
    /// No new tasks; queued ones still run.
    ShuttingDown,
    /// Queue empty, no workers left.
    Terminated,
}

/// State shared between the pool handle and its workers.
pub(crate) struct PoolShared {
    pub(crate) config: PoolConfig,
    pub(crate) queue: TaskQueue<Task>,
    state: Mutex<PoolState>,
    terminated: Condvar,
    /// Live plus reserved worker threads.
    pub(crate) workers: AtomicUsize,
    active: AtomicUsize,
    next_worker: AtomicUsize,
    interrupt: Arc<AtomicBool>,
    panics: PanicHandler,
    pub(crate) metrics: Metrics,
    ids: TaskIdGen,
}

impl PoolShared {
    pub(crate) fn is_running(&self) -> bool {
        *self.state.lock() == PoolState::Running
    }

    // Reserve a worker slot below `limit`. Checked under the state lock so
    // a pool can never terminate with a worker about to start.
    fn reserve_worker(&self, limit: usize, draining: bool) -> bool {
        let state = self.state.lock();
        let allowed = match *state {
            PoolState::Running => true,
            PoolState::ShuttingDown => draining,
            PoolState::Terminated => false,
        };
        if !allowed {
            return false;
        }

        let mut current = self.workers.load(Ordering::Acquire);
        loop {
            if current >= limit {
                return false;
            }
            match self.workers.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.metrics.observe_pool_size(current + 1);
                    return true;
                }
                Err(actual) => current = actual,
            }
        }
    }

    fn release_reservation(&self) {
        self.workers.fetch_sub(1, Ordering::AcqRel);
        self.try_terminate();
    }

    fn spawn_thread(self: &Arc<Self>, first: Arc<Mutex<Option<Task>>>) -> std::io::Result<()> {
        let id: WorkerId = self.next_worker.fetch_add(1, Ordering::Relaxed);
        let name = format!("{}-{}", self.config.thread_name_prefix, id);

        let mut builder = thread::Builder::new().name(name);
        if let Some(stack_size) = self.config.stack_size {
            builder = builder.stack_size(stack_size);
        }

        let shared = Arc::clone(self);
        builder.spawn(move || {
            let first = first.lock().take();
            Worker::new(id, shared, first).run();
        })?;
        Ok(())
    }

    /// Start a reserved worker whose first task is `task`. Hands the task
    /// back if the thread could not be spawned.
    fn start_worker_with(self: &Arc<Self>, task: Task) -> std::result::Result<(), Task> {
        let slot = Arc::new(Mutex::new(Some(task)));
        match self.spawn_thread(Arc::clone(&slot)) {
            Ok(()) => Ok(()),
            Err(err) => {
                tracing::warn!(error = %err, "failed to spawn worker thread");
                self.release_reservation();
                match slot.lock().take() {
                    Some(task) => Err(task),
                    None => Ok(()),
                }
            }
        }
    }

    fn start_idle_worker(self: &Arc<Self>) -> std::io::Result<()> {
        self.spawn_thread(Arc::new(Mutex::new(None)))
            .map_err(|err| {
                tracing::warn!(error = %err, "failed to spawn worker thread");
                self.release_reservation();
                err
            })
    }

    // Queued work with nobody left to run it gets one worker.
    fn ensure_drainer(self: &Arc<Self>) {
        if self.workers.load(Ordering::Acquire) == 0
            && !self.queue.is_empty()
            && self.reserve_worker(1, true)
        {
            let _ = self.start_idle_worker();
        }
    }

    pub(crate) fn run_task(&self, task: Task, on_worker: bool) {
        let id = task.id;
        if on_worker {
            self.active.fetch_add(1, Ordering::AcqRel);
        }

        let started = Instant::now();
        let outcome = task.run(&RunContext {
            interrupt: &self.interrupt,
            panics: &self.panics,
        });

        if on_worker {
            self.active.fetch_sub(1, Ordering::AcqRel);
        }
        if outcome == RunOutcome::Failed {
            tracing::trace!(task = %id, "task failed");
        }
        self.metrics.record_outcome(outcome, started.elapsed());
    }

    pub(crate) fn on_worker_exit(self: &Arc<Self>) {
        self.ensure_drainer();
        self.try_terminate();
    }

    fn try_terminate(&self) {
        let mut state = self.state.lock();
        if *state == PoolState::ShuttingDown
            && self.workers.load(Ordering::Acquire) == 0
            && self.queue.is_empty()
        {
            *state = PoolState::Terminated;
            self.terminated.notify_all();
            tracing::debug!(
                completed = self.metrics.completed(),
                "pool terminated"
            );
        }
    }

    fn refuse(&self, task: Task, reason: &str) -> std::result::Result<(), Refused> {
        self.metrics.record_rejected();
        tracing::debug!(task = %task.id, reason, "task refused");
        Err(Refused::new(task, Error::rejected(reason)))
    }
}

/// A bounded pool of worker threads fed from a FIFO queue.
///
/// Sizing follows `core_workers`, `max_workers` and `keep_alive` from
/// [`PoolConfig`]:
///
/// 1. fewer than `core_workers` alive: start a core worker for the task
/// 2. room in the queue: enqueue it
/// 3. fewer than `max_workers` alive: start a transient worker
/// 4. otherwise apply the [`RejectionPolicy`](crate::RejectionPolicy)
///
/// Transient workers exit after sitting idle for `keep_alive`.
///
/// Task bodies that fail are captured into their handle and never take
/// down a worker. Failures from [`execute`](Self::execute) have no handle
/// to land in, so they only show up in [`metrics`](Self::metrics) and the
/// log.
pub struct WorkerPool {
    shared: Arc<PoolShared>,
}

impl WorkerPool {
    pub fn new(config: PoolConfig) -> Result<Self> {
        config.validate()?;

        let shared = Arc::new(PoolShared {
            queue: TaskQueue::with_capacity(config.queue_capacity),
            state: Mutex::new(PoolState::Running),
            terminated: Condvar::new(),
            workers: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            next_worker: AtomicUsize::new(0),
            interrupt: Arc::new(AtomicBool::new(false)),
            panics: PanicHandler::new(config.panic_strategy),
            metrics: Metrics::new(),
            ids: TaskIdGen::default(),
            config,
        });

        if shared.config.prestart_core_workers {
            let core = shared.config.core_workers;
            while shared.reserve_worker(core, false) {
                if let Err(err) = shared.start_idle_worker() {
                    // Let the workers that did start run off.
                    shared.queue.close();
                    return Err(err.into());
                }
            }
        }

        tracing::debug!(
            core = shared.config.core_workers,
            max = shared.config.max_workers,
            capacity = ?shared.config.queue_capacity,
            policy = ?shared.config.rejection_policy,
            "worker pool created"
        );

        Ok(Self { shared })
    }

    /// One worker, unbounded queue.
    pub fn single_worker() -> Result<Self> {
        Self::new(PoolConfig::single_worker())
    }

    /// `n` workers, unbounded queue.
    pub fn fixed(n: usize) -> Result<Self> {
        Self::new(PoolConfig::fixed(n))
    }

    /// Workers on demand with direct hand-off, reaped after 60s idle.
    pub fn cached() -> Result<Self> {
        Self::new(PoolConfig::cached())
    }

    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Submit a task and get a handle to its result.
    ///
    /// Never blocks, except under [`CallerRuns`](crate::RejectionPolicy::CallerRuns)
    /// when the pool is saturated.
    pub fn submit<T, F>(&self, f: F) -> Result<ResultHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    {
        self.submit_interruptible(move |_| f())
    }

    /// Like [`submit`](Self::submit), but the body gets a token it can
    /// poll to notice cancellation.
    pub fn submit_interruptible<T, F>(&self, f: F) -> Result<ResultHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce(&CancellationToken) -> anyhow::Result<T> + Send + 'static,
    {
        let handle = self.watched_handle();
        self.dispatch(Task::with_handle(handle.clone(), f))?;
        Ok(handle)
    }

    /// Fire and forget.
    pub fn execute<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.dispatch(Task::detached(self.next_task_id(), f))
    }

    pub(crate) fn next_task_id(&self) -> TaskId {
        self.shared.ids.next()
    }

    /// A fresh handle that pulls its task out of the queue when cancelled.
    pub(crate) fn watched_handle<T: Send + 'static>(&self) -> ResultHandle<T> {
        let handle = ResultHandle::new(self.next_task_id());
        let id = handle.id();
        let pool: Weak<PoolShared> = Arc::downgrade(&self.shared);
        handle.on_complete(move |done| {
            if !done.is_cancelled() {
                return;
            }
            if let Some(pool) = pool.upgrade() {
                if pool.queue.remove_first(|task| task.id == id).is_some() {
                    pool.metrics.record_cancelled(1);
                    tracing::trace!(task = %id, "cancelled task removed from queue");
                    pool.try_terminate();
                }
            }
        });
        handle
    }

    /// Like [`submit_interruptible`](Self::submit_interruptible), with
    /// `listener` attached to the handle before the task can start.
    ///
    /// The listener sees every terminal transition of an admitted task,
    /// including one that happens on the caller under `CallerRuns`. It never
    /// fires for a task the pool refuses.
    pub(crate) fn submit_observed<T, F, L>(&self, f: F, listener: L) -> Result<ResultHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce(&CancellationToken) -> anyhow::Result<T> + Send + 'static,
        L: FnOnce(&ResultHandle<T>) + Send + 'static,
    {
        let handle = self.watched_handle();
        let admitted = Arc::new(AtomicBool::new(true));
        let gate = Arc::clone(&admitted);
        handle.on_complete(move |done| {
            if gate.load(Ordering::Acquire) {
                listener(done);
            }
        });

        match self.admit(Task::with_handle(handle.clone(), f)) {
            Ok(()) => Ok(handle),
            Err(refused) => {
                // Still pending: nothing ran it and nothing else holds the handle.
                admitted.store(false, Ordering::Release);
                Err(refused.abort())
            }
        }
    }

    pub(crate) fn dispatch(&self, task: Task) -> Result<()> {
        self.admit(task).map_err(Refused::abort)
    }

    /// Hand `task` to a worker, the queue or the rejection policy. A refused
    /// task comes back unaborted.
    fn admit(&self, task: Task) -> std::result::Result<(), Refused> {
        let shared = &self.shared;
        let config = &shared.config;
        shared.metrics.record_submitted();

        if !shared.is_running() {
            return shared.refuse(task, "pool is not accepting tasks");
        }

        let mut task = task;
        if shared.workers.load(Ordering::Acquire) < config.core_workers
            && shared.reserve_worker(config.core_workers, false)
        {
            match shared.start_worker_with(task) {
                Ok(()) => return Ok(()),
                Err(back) => task = back,
            }
        }

        match shared.queue.offer(task) {
            Ok(()) => {
                shared.ensure_drainer();
                return Ok(());
            }
            Err(back) => task = back,
        }

        if shared.reserve_worker(config.max_workers, false) {
            // The new worker starts on the oldest queued task.
            return match shared.queue.rotate(task) {
                Ok(first) => {
                    if let Err(first) = shared.start_worker_with(first) {
                        shared.queue.push_front(first);
                        shared.ensure_drainer();
                    }
                    Ok(())
                }
                Err(back) => {
                    shared.release_reservation();
                    shared.refuse(back, "pool is shutting down")
                }
            };
        }

        if shared.queue.is_closed() {
            return shared.refuse(task, "pool is shutting down");
        }
        config.rejection_policy.reject(task, shared)
    }

    /// Stop accepting tasks. Queued and running tasks still complete.
    pub fn shutdown(&self) {
        let shared = &self.shared;
        {
            let mut state = shared.state.lock();
            if *state != PoolState::Running {
                return;
            }
            *state = PoolState::ShuttingDown;
        }

        tracing::debug!(
            queued = shared.queue.len(),
            workers = shared.workers.load(Ordering::Acquire),
            "pool shutting down"
        );
        shared.queue.close();
        shared.ensure_drainer();
        shared.try_terminate();
    }

    /// Stop accepting tasks, drop everything still queued and ask running
    /// tasks to stop.
    ///
    /// Running tasks only stop if they poll their
    /// [`CancellationToken`]. Returns how many queued tasks were dropped;
    /// their handles are `Cancelled`.
    pub fn shutdown_now(&self) -> usize {
        let shared = &self.shared;
        {
            let mut state = shared.state.lock();
            if *state == PoolState::Running {
                *state = PoolState::ShuttingDown;
            }
        }

        shared.interrupt.store(true, Ordering::Release);
        shared.queue.close();
        let drained = shared.queue.drain();
        let count = drained.len();
        for task in drained {
            task.abort();
        }
        shared.metrics.record_cancelled(count as u64);

        tracing::debug!(drained = count, "pool shutting down now");
        shared.try_terminate();
        count
    }

    /// Block until the pool is `Terminated` or `timeout` passes.
    ///
    /// Calling this from one of the pool's own tasks waits out the full
    /// timeout, since that worker cannot exit while it waits.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let shared = &self.shared;
        let deadline = Instant::now().checked_add(timeout);

        let mut state = shared.state.lock();
        while *state != PoolState::Terminated {
            match deadline {
                Some(deadline) => {
                    if shared.terminated.wait_until(&mut state, deadline).timed_out() {
                        return *state == PoolState::Terminated;
                    }
                }
                None => shared.terminated.wait(&mut state),
            }
        }
        true
    }

    pub fn state(&self) -> PoolState {
        *self.shared.state.lock()
    }

    pub fn is_shutdown(&self) -> bool {
        self.state() != PoolState::Running
    }

    pub fn is_terminated(&self) -> bool {
        self.state() == PoolState::Terminated
    }

    /// Worker threads currently alive.
    pub fn pool_size(&self) -> usize {
        self.shared.workers.load(Ordering::Acquire)
    }

    /// Workers currently running a task.
    pub fn active_count(&self) -> usize {
        self.shared.active.load(Ordering::Acquire)
    }

    /// Tasks waiting in the queue. May briefly read above the capacity while
    /// a hand-off to an idle worker is in flight.
    pub fn queued(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn metrics(&self) -> PoolMetrics {
        let shared = &self.shared;
        shared.metrics.snapshot(
            self.active_count(),
            self.queued(),
            self.pool_size(),
            shared.panics.panic_count() as u64,
        )
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("state", &self.state())
            .field("pool_size", &self.pool_size())
            .field("active", &self.active_count())
            .field("queued", &self.queued())
            .finish()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
