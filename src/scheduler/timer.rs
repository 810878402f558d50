//! Time-ordered trigger heap and the timer thread that drains it.

use super::clock::Clock;
use crate::error::{Error, Result};
use crate::executor::task::{Job, RunContext, RunOutcome, Task, TaskId};
use crate::executor::WorkerPool;
use crate::future::ResultHandle;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

pub(crate) type PeriodicBody = Box<dyn Fn() -> anyhow::Result<()> + Send + Sync>;

/// How a periodic entry picks its next trigger.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Cadence {
    /// Triggers on `first + k * period`.
    FixedRate { first: Instant, period: Duration },
    /// Triggers `delay` after the previous run finished.
    FixedDelay { delay: Duration },
}

pub(crate) struct PeriodicEntry {
    pub(crate) key: u64,
    body: PeriodicBody,
    cadence: Cadence,
    /// Index `k` of the last fixed-rate tick that was dispatched.
    tick: AtomicU64,
    pub(crate) runs: AtomicU64,
    /// Terminal once the entry is cancelled or a run fails.
    pub(crate) done: ResultHandle<()>,
}

impl PeriodicEntry {
    pub(crate) fn new(key: u64, body: PeriodicBody, cadence: Cadence) -> Self {
        Self {
            key,
            body,
            cadence,
            tick: AtomicU64::new(0),
            runs: AtomicU64::new(0),
            done: ResultHandle::new(TaskId::DETACHED),
        }
    }

    // Overdue fixed-rate ticks collapse into the next period boundary at or
    // after `now`. Never earlier than one period past the last tick.
    fn next_due(&self, now: Instant) -> Instant {
        match self.cadence {
            Cadence::FixedDelay { delay } => now.checked_add(delay).unwrap_or(now),
            Cadence::FixedRate { first, period } => {
                let period_ns = period.as_nanos().max(1);
                let elapsed_ns = now.saturating_duration_since(first).as_nanos();
                let caught_up = (elapsed_ns + period_ns - 1) / period_ns;

                let last = self.tick.load(Ordering::Acquire) as u128;
                let k = caught_up.max(last + 1);
                self.tick.store(k.min(u64::MAX as u128) as u64, Ordering::Release);

                let offset = Duration::from_nanos(k.saturating_mul(period_ns).min(u64::MAX as u128) as u64);
                first.checked_add(offset).unwrap_or(now + period)
            }
        }
    }
}

pub(crate) enum EntryKind {
    Once(Task),
    Periodic(Arc<PeriodicEntry>),
}

pub(crate) struct TimerEntry {
    due: Instant,
    /// Insertion order, breaks ties between equal trigger times.
    seq: u64,
    /// Stable identity used for removal.
    key: u64,
    kind: EntryKind,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    // BinaryHeap is a max-heap: earliest due, then lowest seq, sorts highest.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct TimerQueue {
    heap: BinaryHeap<TimerEntry>,
    next_seq: u64,
    shutdown: bool,
}

/// State shared by the scheduler front end and its timer thread.
pub(crate) struct TimerShared {
    queue: Mutex<TimerQueue>,
    wake: Condvar,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) pool: Arc<WorkerPool>,
}

impl TimerShared {
    pub(crate) fn new(pool: Arc<WorkerPool>, clock: Arc<dyn Clock>) -> Self {
        Self {
            queue: Mutex::new(TimerQueue {
                heap: BinaryHeap::new(),
                next_seq: 0,
                shutdown: false,
            }),
            wake: Condvar::new(),
            clock,
            pool,
        }
    }

    pub(crate) fn next_key(&self) -> u64 {
        let mut queue = self.queue.lock();
        queue.next_seq += 1;
        queue.next_seq
    }

    /// Add an entry. Hands it back once the scheduler has shut down.
    pub(crate) fn push(&self, due: Instant, key: u64, kind: EntryKind) -> std::result::Result<(), EntryKind> {
        let mut queue = self.queue.lock();
        if queue.shutdown {
            return Err(kind);
        }
        Self::insert(&mut queue, due, key, kind);
        drop(queue);
        self.wake.notify_one();
        Ok(())
    }

    fn insert(queue: &mut TimerQueue, due: Instant, key: u64, kind: EntryKind) {
        queue.next_seq += 1;
        let seq = queue.next_seq;
        queue.heap.push(TimerEntry { due, seq, key, kind });
    }

    /// Drop the entry with `key` from the heap, if it is waiting there.
    pub(crate) fn remove(&self, key: u64) {
        let removed: Vec<TimerEntry> = {
            let mut queue = self.queue.lock();
            if !queue.heap.iter().any(|entry| entry.key == key) {
                return;
            }
            let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut queue.heap)
                .into_vec()
                .into_iter()
                .partition(|entry| entry.key == key);
            queue.heap = kept.into();
            removed
        };
        tracing::trace!(key, count = removed.len(), "timer entry removed");
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.lock().heap.len()
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.queue.lock().shutdown
    }

    /// Stop the timer and hand back everything still waiting.
    pub(crate) fn close(&self) -> Option<Vec<TimerEntry>> {
        let mut queue = self.queue.lock();
        if queue.shutdown {
            return None;
        }
        queue.shutdown = true;
        let entries = std::mem::take(&mut queue.heap).into_vec();
        drop(queue);
        self.wake.notify_all();
        Some(entries)
    }

    /// Put a periodic entry back after a run, unless it ended meanwhile.
    fn reschedule(&self, entry: Arc<PeriodicEntry>) {
        let due = entry.next_due(self.clock.now());
        let mut queue = self.queue.lock();
        if entry.done.is_done() {
            return;
        }
        if queue.shutdown {
            drop(queue);
            entry.done.cancel(false);
            return;
        }
        let key = entry.key;
        Self::insert(&mut queue, due, key, EntryKind::Periodic(entry));
        drop(queue);
        self.wake.notify_one();
    }

    pub(crate) fn run(self: Arc<Self>) {
        tracing::debug!("timer thread started");

        let mut queue = self.queue.lock();
        loop {
            if queue.shutdown {
                break;
            }

            let now = self.clock.now();
            match queue.heap.peek().map(|entry| entry.due) {
                Some(due) if due <= now => {
                    if let Some(entry) = queue.heap.pop() {
                        MutexGuard::unlocked(&mut queue, || self.fire(entry));
                    }
                }
                Some(due) => {
                    let mut park = due - now;
                    if let Some(max) = self.clock.max_park() {
                        park = park.min(max);
                    }
                    self.wake.wait_for(&mut queue, park);
                }
                None => match self.clock.max_park() {
                    Some(max) => {
                        self.wake.wait_for(&mut queue, max);
                    }
                    None => self.wake.wait(&mut queue),
                },
            }
        }

        tracing::debug!("timer thread stopped");
    }

    fn fire(self: &Arc<Self>, entry: TimerEntry) {
        match entry.kind {
            EntryKind::Once(task) => {
                let id = task.id;
                if let Err(err) = self.pool.dispatch(task) {
                    tracing::warn!(task = %id, error = %err, "scheduled task rejected by pool");
                }
            }
            EntryKind::Periodic(periodic) => {
                if periodic.done.is_done() {
                    return;
                }
                let key = periodic.key;
                let run = PeriodicRun {
                    entry: periodic,
                    timer: Arc::downgrade(self),
                };
                let task = Task::new(self.pool.next_task_id(), Box::new(run));
                if let Err(err) = self.pool.dispatch(task) {
                    tracing::warn!(key, error = %err, "periodic run rejected by pool, entry ended");
                }
            }
        }
    }
}

/// One run of a periodic entry, queued on the pool like any other task.
struct PeriodicRun {
    entry: Arc<PeriodicEntry>,
    timer: Weak<TimerShared>,
}

impl Job for PeriodicRun {
    fn run(self: Box<Self>, id: TaskId, ctx: &RunContext<'_>) -> RunOutcome {
        let PeriodicRun { entry, timer } = *self;
        if entry.done.is_done() {
            return RunOutcome::Skipped;
        }

        entry.runs.fetch_add(1, Ordering::AcqRel);
        match ctx.panics.execute(id, || (entry.body)()) {
            Ok(()) => {
                match timer.upgrade() {
                    Some(timer) => timer.reschedule(entry),
                    None => {
                        entry.done.cancel(false);
                    }
                }
                RunOutcome::Completed
            }
            Err(failure) => {
                tracing::warn!(key = entry.key, error = %failure, "periodic run failed, no further runs");
                entry.done.set_failure(failure);
                RunOutcome::Failed
            }
        }
    }

    fn abort(self: Box<Self>) {
        self.entry.done.cancel(false);
    }
}

/// Entries the timer thread left behind, aborted without running.
pub(crate) fn abandon(entries: Vec<TimerEntry>) {
    for entry in entries {
        abandon_kind(entry.kind);
    }
}

pub(crate) fn abandon_kind(kind: EntryKind) {
    match kind {
        EntryKind::Once(task) => task.abort(),
        EntryKind::Periodic(periodic) => {
            periodic.done.cancel(false);
        }
    }
}

/// Trigger time `delay` from `now`, or an error if it cannot be represented.
pub(crate) fn due_after(now: Instant, delay: Duration) -> Result<Instant> {
    now.checked_add(delay)
        .ok_or_else(|| Error::invalid_argument(format!("delay {:?} is out of range", delay)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body() -> PeriodicBody {
        Box::new(|| Ok(()))
    }

    #[test]
    fn test_heap_pops_earliest_first() {
        let now = Instant::now();
        let mut heap = BinaryHeap::new();
        for (i, ms) in [30u64, 10, 20, 10].iter().enumerate() {
            heap.push(TimerEntry {
                due: now + Duration::from_millis(*ms),
                seq: i as u64,
                key: i as u64,
                kind: EntryKind::Periodic(Arc::new(PeriodicEntry::new(
                    i as u64,
                    body(),
                    Cadence::FixedDelay {
                        delay: Duration::from_secs(1),
                    },
                ))),
            });
        }

        let order: Vec<u64> = std::iter::from_fn(|| heap.pop().map(|e| e.key)).collect();
        assert_eq!(order, vec![1, 3, 2, 0]);
    }

    #[test]
    fn test_fixed_rate_on_time() {
        let first = Instant::now();
        let period = Duration::from_millis(100);
        let entry = PeriodicEntry::new(1, body(), Cadence::FixedRate { first, period });

        // Run at k=0 finished quickly.
        let due = entry.next_due(first + Duration::from_millis(10));
        assert_eq!(due, first + period);
        let due = entry.next_due(first + Duration::from_millis(120));
        assert_eq!(due, first + 2 * period);
    }

    #[test]
    fn test_fixed_rate_overrun_skips_missed_ticks() {
        let first = Instant::now();
        let period = Duration::from_millis(100);
        let entry = PeriodicEntry::new(1, body(), Cadence::FixedRate { first, period });

        // A 250ms run started at 0 resumes on the 300ms boundary.
        let due = entry.next_due(first + Duration::from_millis(250));
        assert_eq!(due, first + 3 * period);

        // Finishing exactly on a boundary is not earlier than one period on.
        let due = entry.next_due(first + Duration::from_millis(300));
        assert_eq!(due, first + 4 * period);
    }

    #[test]
    fn test_fixed_delay_counts_from_completion() {
        let now = Instant::now();
        let delay = Duration::from_millis(40);
        let entry = PeriodicEntry::new(1, body(), Cadence::FixedDelay { delay });
        assert_eq!(entry.next_due(now), now + delay);
    }

    #[test]
    fn test_due_after_overflow() {
        let err = due_after(Instant::now(), Duration::MAX).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }
}
