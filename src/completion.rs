//! Results in the order tasks finish.

use crate::error::{Error, Result};
use crate::executor::WorkerPool;
use crate::future::{CancellationToken, ResultHandle};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Submits tasks to a pool and hands their handles back as they complete,
/// whatever order they were submitted in.
///
/// ```no_run
/// use std::sync::Arc;
/// use veda_exec::{CompletionCollector, WorkerPool};
///
/// let pool = Arc::new(WorkerPool::fixed(4)?);
/// let collector = CompletionCollector::new(pool);
/// for n in [30u64, 10, 20] {
///     collector.submit(move || {
///         std::thread::sleep(std::time::Duration::from_millis(n));
///         Ok(n)
///     })?;
/// }
/// // 10, 20, 30
/// while collector.pending() > 0 {
///     println!("{}", collector.take()?.get()?);
/// }
/// # Ok::<(), veda_exec::Error>(())
/// ```
pub struct CompletionCollector<T> {
    pool: Arc<WorkerPool>,
    sender: Sender<ResultHandle<T>>,
    receiver: Receiver<ResultHandle<T>>,
    pending: AtomicUsize,
}

impl<T: Send + 'static> CompletionCollector<T> {
    pub fn new(pool: Arc<WorkerPool>) -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        Self {
            pool,
            sender,
            receiver,
            pending: AtomicUsize::new(0),
        }
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    pub fn submit<F>(&self, f: F) -> Result<ResultHandle<T>>
    where
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    {
        self.submit_interruptible(move |_| f())
    }

    /// The handle is queued for [`take`](Self::take) by the thread that
    /// finishes the task, so completion order is exact even for tasks run
    /// on the caller. Rejected submissions never show up.
    pub fn submit_interruptible<F>(&self, f: F) -> Result<ResultHandle<T>>
    where
        F: FnOnce(&CancellationToken) -> anyhow::Result<T> + Send + 'static,
    {
        // Counted up front: the task may finish before submit returns.
        self.pending.fetch_add(1, Ordering::AcqRel);
        let sender = self.sender.clone();
        let submitted = self.pool.submit_observed(f, move |done: &ResultHandle<T>| {
            let _ = sender.send(done.clone());
        });
        if submitted.is_err() {
            self.pending.fetch_sub(1, Ordering::AcqRel);
        }
        submitted
    }

    /// Block until a task finishes and return its handle.
    ///
    /// Blocks forever if nothing was submitted.
    pub fn take(&self) -> Result<ResultHandle<T>> {
        let handle = self
            .receiver
            .recv()
            .map_err(|_| Error::illegal_state("completion channel closed"))?;
        self.pending.fetch_sub(1, Ordering::AcqRel);
        Ok(handle)
    }

    pub fn take_timeout(&self, timeout: Duration) -> Result<ResultHandle<T>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(handle) => {
                self.pending.fetch_sub(1, Ordering::AcqRel);
                Ok(handle)
            }
            Err(RecvTimeoutError::Timeout) => Err(Error::Timeout(timeout)),
            Err(RecvTimeoutError::Disconnected) => {
                Err(Error::illegal_state("completion channel closed"))
            }
        }
    }

    /// A finished handle if one is waiting.
    pub fn poll(&self) -> Option<ResultHandle<T>> {
        let handle = self.receiver.try_recv().ok()?;
        self.pending.fetch_sub(1, Ordering::AcqRel);
        Some(handle)
    }

    /// Submitted but not yet taken, finished or not.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }
}

impl<T> fmt::Debug for CompletionCollector<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionCollector")
            .field("pending", &self.pending.load(Ordering::Acquire))
            .field("ready", &self.receiver.len())
            .finish()
    }
}
