//! Fan-out/fan-in over a group of tasks: run all, or take the first success.

use crate::error::{Error, Result};
use crate::executor::WorkerPool;
use crate::future::{CancellationToken, ResultHandle};
use crossbeam_channel::RecvTimeoutError;
use std::time::{Duration, Instant};

impl WorkerPool {
    /// Run every task and wait for all of them.
    ///
    /// Handles come back in submission order. A failing task shows up as a
    /// `Failed` handle, not as an error here. If a submission is rejected
    /// the tasks already submitted are cancelled and the rejection returned.
    pub fn invoke_all<T, F, I>(&self, tasks: I) -> Result<Vec<ResultHandle<T>>>
    where
        T: Send + 'static,
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
        I: IntoIterator<Item = F>,
    {
        let handles = self.submit_batch(tasks)?;
        for handle in &handles {
            handle.wait();
        }
        Ok(handles)
    }

    /// Like [`invoke_all`](Self::invoke_all), but tasks still unfinished
    /// after `timeout` are cancelled (with interrupt) before returning.
    pub fn invoke_all_timeout<T, F, I>(
        &self,
        tasks: I,
        timeout: Duration,
    ) -> Result<Vec<ResultHandle<T>>>
    where
        T: Send + 'static,
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
        I: IntoIterator<Item = F>,
    {
        let deadline = Instant::now().checked_add(timeout);
        let handles = self.submit_batch(tasks)?;

        if let Some(deadline) = deadline {
            let all_done = handles.iter().all(|handle| handle.wait_deadline(deadline));
            if !all_done {
                let cancelled = handles.iter().filter(|h| h.cancel(true)).count();
                tracing::debug!(cancelled, ?timeout, "invoke_all timed out");
            }
        } else {
            handles.iter().for_each(ResultHandle::wait);
        }
        Ok(handles)
    }

    /// Run every task and return the value of the first to succeed.
    ///
    /// The rest are cancelled with interrupt. If none succeeds the last
    /// failure is returned. An empty task list is an
    /// [`Error::InvalidArgument`].
    pub fn invoke_any<T, F, I>(&self, tasks: I) -> Result<T>
    where
        T: Clone + Send + 'static,
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
        I: IntoIterator<Item = F>,
    {
        self.first_success(uninterruptible(tasks), None)
    }

    /// Like [`invoke_any`](Self::invoke_any), giving up with
    /// [`Error::Timeout`] after `timeout` and cancelling everything.
    pub fn invoke_any_timeout<T, F, I>(&self, tasks: I, timeout: Duration) -> Result<T>
    where
        T: Clone + Send + 'static,
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
        I: IntoIterator<Item = F>,
    {
        self.first_success(uninterruptible(tasks), Some(timeout))
    }

    fn submit_batch<T, F, I>(&self, tasks: I) -> Result<Vec<ResultHandle<T>>>
    where
        T: Send + 'static,
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
        I: IntoIterator<Item = F>,
    {
        let tasks = tasks.into_iter();
        let mut handles = Vec::with_capacity(tasks.size_hint().0);
        for task in tasks {
            match self.submit(task) {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    tracing::debug!(submitted = handles.len(), error = %err, "batch submission rejected");
                    cancel_all(&handles);
                    return Err(err);
                }
            }
        }
        Ok(handles)
    }

    fn first_success<T, F, I>(&self, tasks: I, timeout: Option<Duration>) -> Result<T>
    where
        T: Clone + Send + 'static,
        F: FnOnce(&CancellationToken) -> anyhow::Result<T> + Send + 'static,
        I: IntoIterator<Item = F>,
    {
        let tasks: Vec<F> = tasks.into_iter().collect();
        if tasks.is_empty() {
            return Err(Error::invalid_argument("invoke_any needs at least one task"));
        }
        let deadline = timeout.and_then(|timeout| Instant::now().checked_add(timeout));

        // Listeners go on before each task can start, so the channel sees
        // handles in the exact order they finish.
        let (sender, finished) = crossbeam_channel::unbounded();
        let mut handles = Vec::with_capacity(tasks.len());
        for task in tasks {
            let sender = sender.clone();
            let observed = self.submit_observed(task, move |done: &ResultHandle<T>| {
                let _ = sender.send(done.clone());
            });
            match observed {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    tracing::debug!(submitted = handles.len(), error = %err, "batch submission rejected");
                    cancel_all(&handles);
                    return Err(err);
                }
            }
        }
        drop(sender);

        let mut last_error = Error::Cancelled;
        for _ in 0..handles.len() {
            let done = match deadline {
                Some(deadline) => match finished.recv_deadline(deadline) {
                    Ok(done) => done,
                    Err(RecvTimeoutError::Timeout) => {
                        cancel_all(&handles);
                        return Err(Error::Timeout(timeout.unwrap_or_default()));
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                },
                None => match finished.recv() {
                    Ok(done) => done,
                    Err(_) => break,
                },
            };

            match done.get() {
                Ok(value) => {
                    cancel_all(&handles);
                    return Ok(value);
                }
                Err(err) => last_error = err,
            }
        }
        Err(last_error)
    }
}

fn uninterruptible<T, F, I>(
    tasks: I,
) -> impl Iterator<Item = impl FnOnce(&CancellationToken) -> anyhow::Result<T> + Send + 'static>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    I: IntoIterator<Item = F>,
{
    tasks
        .into_iter()
        .map(|task| move |_: &CancellationToken| task())
}

fn cancel_all<T: Send + 'static>(handles: &[ResultHandle<T>]) {
    for handle in handles {
        handle.cancel(true);
    }
}
