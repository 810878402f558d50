//! Metrics collection for pool monitoring.

use crate::executor::task::RunOutcome;
use hdrhistogram::Histogram;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Pool-wide counters, updated by submitters and workers.
#[derive(Debug)]
pub struct Metrics {
    // Admission
    submitted: AtomicU64,
    rejected: AtomicU64,
    cancelled: AtomicU64,

    // Execution
    completed: AtomicU64,
    failed: AtomicU64,

    peak_pool_size: AtomicUsize,

    // Run time of each task. None if the histogram could not be built.
    latency_histogram: Mutex<Option<Histogram<u64>>>,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        // 3 significant figures, max 1 hour in nanoseconds
        let histogram = Histogram::new_with_max(3_600_000_000_000, 3).ok();

        Self {
            submitted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            cancelled: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            peak_pool_size: AtomicUsize::new(0),
            latency_histogram: Mutex::new(histogram),
            start_time: Instant::now(),
        }
    }

    pub fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Tasks dropped from the queue without running.
    pub fn record_cancelled(&self, n: u64) {
        self.cancelled.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn record_outcome(&self, outcome: RunOutcome, elapsed: Duration) {
        match outcome {
            RunOutcome::Skipped => {
                self.cancelled.fetch_add(1, Ordering::Relaxed);
                return;
            }
            RunOutcome::Failed => {
                self.failed.fetch_add(1, Ordering::Relaxed);
            }
            RunOutcome::Completed => {}
        }
        self.completed.fetch_add(1, Ordering::Relaxed);

        if let Some(hist) = self.latency_histogram.lock().as_mut() {
            let _ = hist.record(elapsed.as_nanos().min(u64::MAX as u128) as u64);
        }
    }

    pub fn observe_pool_size(&self, size: usize) {
        self.peak_pool_size.fetch_max(size, Ordering::Relaxed);
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Combine the counters with the pool's live gauges.
    pub fn snapshot(
        &self,
        active: usize,
        queued: usize,
        pool_size: usize,
        panicked: u64,
    ) -> PoolMetrics {
        let latency = self.latency_histogram.lock();
        let (avg, p50, p99, max) = match latency.as_ref() {
            Some(hist) if hist.len() > 0 => (
                hist.mean() as u64,
                hist.value_at_quantile(0.50),
                hist.value_at_quantile(0.99),
                hist.max(),
            ),
            _ => (0, 0, 0, 0),
        };

        PoolMetrics {
            active,
            queued,
            completed: self.completed.load(Ordering::Relaxed),
            pool_size,
            peak_pool_size: self.peak_pool_size.load(Ordering::Relaxed),
            submitted: self.submitted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            panicked,
            avg_latency_ns: avg,
            p50_latency_ns: p50,
            p99_latency_ns: p99,
            max_latency_ns: max,
            uptime: self.start_time.elapsed(),
        }
    }

    pub fn reset(&self) {
        self.submitted.store(0, Ordering::Relaxed);
        self.rejected.store(0, Ordering::Relaxed);
        self.cancelled.store(0, Ordering::Relaxed);
        self.completed.store(0, Ordering::Relaxed);
        self.failed.store(0, Ordering::Relaxed);

        if let Some(hist) = self.latency_histogram.lock().as_mut() {
            hist.reset();
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time view of a pool
#[derive(Debug, Clone, Default)]
pub struct PoolMetrics {
    /// Workers running a task right now.
    pub active: usize,
    pub queued: usize,
    /// Tasks whose body ran to the end, successfully or not.
    pub completed: u64,
    pub pool_size: usize,
    pub peak_pool_size: usize,
    pub submitted: u64,
    /// Submissions that hit a full pool or a shut down one, whatever the
    /// policy then did with them.
    pub rejected: u64,
    /// Subset of `completed` that failed or panicked.
    pub failed: u64,
    /// Tasks that never ran: cancelled while queued, discarded by policy
    /// or drained by `shutdown_now`.
    pub cancelled: u64,
    pub panicked: u64,
    pub avg_latency_ns: u64,
    pub p50_latency_ns: u64,
    pub p99_latency_ns: u64,
    pub max_latency_ns: u64,
    pub uptime: Duration,
}

impl PoolMetrics {
    pub fn tasks_per_second(&self) -> f64 {
        let seconds = self.uptime.as_secs_f64();
        if seconds == 0.0 {
            return 0.0;
        }
        self.completed as f64 / seconds
    }

    /// Fraction of finished tasks that succeeded (1.0 when none finished).
    pub fn success_rate(&self) -> f64 {
        if self.completed == 0 {
            return 1.0;
        }
        (self.completed - self.failed) as f64 / self.completed as f64
    }
}
