//! Delayed and periodic execution on top of a [`WorkerPool`].
//!
//! A single timer thread keeps every pending trigger in a time-ordered heap,
//! sleeps until the earliest one is due and hands it to the pool. Bodies
//! never run on the timer thread itself (unless the pool's rejection policy
//! is `CallerRuns`).
//!
//! Periodic entries never overlap with themselves: the next trigger is only
//! computed once the current run has finished. For fixed-rate entries an
//! overrun skips the missed ticks and resumes on the next period boundary.

pub mod clock;
pub(crate) mod timer;

pub use clock::{Clock, ManualClock, SystemClock};

use crate::error::{Error, Result};
use crate::executor::{Task, WorkerPool};
use crate::future::ResultHandle;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use timer::{Cadence, EntryKind, PeriodicEntry, TimerShared};

/// Handle to a periodic entry.
///
/// Cloning gives another handle to the same entry.
#[derive(Clone)]
pub struct PeriodicHandle {
    entry: Arc<PeriodicEntry>,
}

impl PeriodicHandle {
    /// Stop further runs. A run already in progress finishes normally.
    ///
    /// Returns `false` if the entry had already ended.
    pub fn cancel(&self) -> bool {
        self.entry.done.cancel(false)
    }

    pub fn is_cancelled(&self) -> bool {
        self.entry.done.is_cancelled()
    }

    /// Whether the entry has ended, by cancellation or a failed run.
    pub fn is_done(&self) -> bool {
        self.entry.done.is_done()
    }

    /// Runs started so far.
    pub fn run_count(&self) -> u64 {
        self.entry.runs.load(Ordering::Acquire)
    }

    /// Block until the entry ends.
    ///
    /// A periodic entry never completes normally, so this returns
    /// [`Error::Cancelled`] or [`Error::Execution`] with the failure of the
    /// run that ended it.
    pub fn wait(&self) -> Result<()> {
        self.entry.done.get()
    }

    /// Like [`wait`](Self::wait), failing with [`Error::Timeout`] if the
    /// entry is still live after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<()> {
        self.entry.done.get_timeout(timeout)
    }
}

impl fmt::Debug for PeriodicHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeriodicHandle")
            .field("key", &self.entry.key)
            .field("state", &self.entry.done.state())
            .field("runs", &self.run_count())
            .finish()
    }
}

/// Runs tasks after a delay or periodically, through a bound pool.
pub struct Scheduler {
    shared: Arc<TimerShared>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    /// Scheduler on the system clock.
    pub fn new(pool: Arc<WorkerPool>) -> Result<Self> {
        Self::with_clock(pool, Arc::new(SystemClock))
    }

    pub fn with_clock(pool: Arc<WorkerPool>, clock: Arc<dyn Clock>) -> Result<Self> {
        let name = format!("{}-timer", pool.config().thread_name_prefix);
        let shared = Arc::new(TimerShared::new(pool, clock));

        let runner = Arc::clone(&shared);
        let timer = thread::Builder::new()
            .name(name)
            .spawn(move || runner.run())?;

        Ok(Self {
            shared,
            timer: Mutex::new(Some(timer)),
        })
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.shared.pool
    }

    /// Run `f` once, `delay` from now.
    ///
    /// Cancelling the returned handle before the delay elapses removes the
    /// trigger; the task never reaches the pool.
    pub fn schedule<T, F>(&self, f: F, delay: Duration) -> Result<ResultHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    {
        let due = timer::due_after(self.shared.clock.now(), delay)?;

        let handle = self.shared.pool.watched_handle();
        let task = Task::with_handle(handle.clone(), move |_| f());
        let key = self.shared.next_key();

        if let Err(kind) = self.shared.push(due, key, EntryKind::Once(task)) {
            timer::abandon_kind(kind);
            return Err(Error::rejected("scheduler is shut down"));
        }

        let timer = Arc::downgrade(&self.shared);
        handle.on_complete(move |done| {
            if done.is_cancelled() {
                if let Some(timer) = timer.upgrade() {
                    timer.remove(key);
                }
            }
        });

        tracing::trace!(task = %handle.id(), ?delay, "one-shot scheduled");
        Ok(handle)
    }

    /// Run `f` on `initial_delay + k * period`.
    ///
    /// A run that overruns its period delays the next one instead of
    /// overlapping it; missed ticks are skipped, not replayed. A failed run
    /// ends the entry.
    pub fn schedule_at_fixed_rate<F>(
        &self,
        f: F,
        initial_delay: Duration,
        period: Duration,
    ) -> Result<PeriodicHandle>
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        if period.is_zero() {
            return Err(Error::invalid_argument("period must be > 0"));
        }
        let first = timer::due_after(self.shared.clock.now(), initial_delay)?;
        self.schedule_periodic(Box::new(f), first, Cadence::FixedRate { first, period })
    }

    /// Run `f` after `initial_delay`, then `delay` after each run finishes.
    pub fn schedule_with_fixed_delay<F>(
        &self,
        f: F,
        initial_delay: Duration,
        delay: Duration,
    ) -> Result<PeriodicHandle>
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        if delay.is_zero() {
            return Err(Error::invalid_argument("delay must be > 0"));
        }
        let first = timer::due_after(self.shared.clock.now(), initial_delay)?;
        self.schedule_periodic(Box::new(f), first, Cadence::FixedDelay { delay })
    }

    fn schedule_periodic(
        &self,
        body: timer::PeriodicBody,
        first: std::time::Instant,
        cadence: Cadence,
    ) -> Result<PeriodicHandle> {
        let key = self.shared.next_key();
        let entry = Arc::new(PeriodicEntry::new(key, body, cadence));

        let timer = Arc::downgrade(&self.shared);
        entry.done.on_complete(move |_| {
            if let Some(timer) = timer.upgrade() {
                timer.remove(key);
            }
        });

        if let Err(kind) = self.shared.push(first, key, EntryKind::Periodic(Arc::clone(&entry))) {
            timer::abandon_kind(kind);
            return Err(Error::rejected("scheduler is shut down"));
        }

        tracing::trace!(key, ?cadence, "periodic entry scheduled");
        Ok(PeriodicHandle { entry })
    }

    /// Cancel a periodic entry.
    ///
    /// Fails with [`Error::IllegalState`] if it already ended.
    pub fn cancel(&self, handle: &PeriodicHandle) -> Result<()> {
        if handle.cancel() {
            Ok(())
        } else {
            Err(Error::illegal_state("periodic entry has already ended"))
        }
    }

    /// Triggers waiting in the heap. Periodic entries mid-run are not
    /// counted.
    pub fn pending(&self) -> usize {
        self.shared.len()
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.is_shutdown()
    }

    /// Stop the timer thread and cancel every outstanding entry.
    ///
    /// Tasks already handed to the pool are left alone. The pool itself is
    /// not shut down.
    pub fn shutdown(&self) {
        if let Some(entries) = self.shared.close() {
            tracing::debug!(outstanding = entries.len(), "scheduler shutting down");
            timer::abandon(entries);
        }

        let timer = self.timer.lock().take();
        if let Some(timer) = timer {
            // A scheduled task may shut its own scheduler down.
            if timer.thread().id() != thread::current().id() {
                let _ = timer.join();
            }
        }
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("pending", &self.pending())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    fn setup() -> (Scheduler, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let pool = Arc::new(WorkerPool::fixed(2).unwrap());
        let scheduler = Scheduler::with_clock(pool, clock.clone()).unwrap();
        (scheduler, clock)
    }

    fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        cond()
    }

    #[test]
    fn test_one_shot_waits_for_clock() {
        let (scheduler, clock) = setup();
        let handle = scheduler.schedule(|| Ok(5), Duration::from_secs(10)).unwrap();

        thread::sleep(Duration::from_millis(20));
        assert!(!handle.is_done());
        assert_eq!(scheduler.pending(), 1);

        clock.advance(Duration::from_secs(10));
        assert_eq!(handle.get_timeout(Duration::from_secs(5)).unwrap(), 5);
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn test_cancel_one_shot_removes_trigger() {
        let (scheduler, clock) = setup();
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = ran.clone();
        let handle = scheduler
            .schedule(
                move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                },
                Duration::from_secs(1),
            )
            .unwrap();

        assert!(handle.cancel(true));
        assert_eq!(scheduler.pending(), 0);

        clock.advance(Duration::from_secs(2));
        thread::sleep(Duration::from_millis(20));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_fixed_rate_ticks() {
        let (scheduler, clock) = setup();
        let periodic = scheduler
            .schedule_at_fixed_rate(|| Ok(()), Duration::ZERO, Duration::from_secs(1))
            .unwrap();

        assert!(wait_until(|| periodic.run_count() == 1));
        for expected in 2..=4 {
            // Wait until the previous run is back in the heap.
            assert!(wait_until(|| scheduler.pending() == 1));
            clock.advance(Duration::from_secs(1));
            assert!(wait_until(|| periodic.run_count() == expected));
        }

        scheduler.cancel(&periodic).unwrap();
        assert!(periodic.is_cancelled());
        assert!(scheduler.cancel(&periodic).unwrap_err().to_string().contains("already ended"));
        assert!(periodic.wait().unwrap_err().is_cancelled());
    }

    #[test]
    fn test_failed_run_ends_entry() {
        let (scheduler, clock) = setup();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let periodic = scheduler
            .schedule_with_fixed_delay(
                move || {
                    if counter.fetch_add(1, Ordering::SeqCst) == 1 {
                        anyhow::bail!("second run fails");
                    }
                    Ok(())
                },
                Duration::ZERO,
                Duration::from_millis(10),
            )
            .unwrap();

        assert!(wait_until(|| scheduler.pending() == 1 && periodic.run_count() == 1));
        clock.advance(Duration::from_millis(10));

        let err = periodic.wait_timeout(Duration::from_secs(5)).unwrap_err();
        assert!(err.to_string().contains("second run fails"));

        clock.advance(Duration::from_secs(1));
        thread::sleep(Duration::from_millis(20));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn test_zero_period_rejected() {
        let (scheduler, _clock) = setup();
        let err = scheduler
            .schedule_at_fixed_rate(|| Ok(()), Duration::ZERO, Duration::ZERO)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_shutdown_cancels_outstanding() {
        let (scheduler, _clock) = setup();
        let once = scheduler.schedule(|| Ok(1), Duration::from_secs(60)).unwrap();
        let periodic = scheduler
            .schedule_at_fixed_rate(|| Ok(()), Duration::from_secs(60), Duration::from_secs(1))
            .unwrap();

        scheduler.shutdown();
        assert!(scheduler.is_shutdown());
        assert!(once.is_cancelled());
        assert!(periodic.is_cancelled());

        let err = scheduler.schedule(|| Ok(2), Duration::ZERO).unwrap_err();
        assert!(err.is_rejected());
    }
}
