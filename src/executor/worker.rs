// worker thread stuff
use super::pool::PoolShared;
use super::queue::Take;
use super::task::Task;
use std::sync::atomic::Ordering;
use std::sync::Arc;

pub type WorkerId = usize;

pub(crate) struct Worker {
    pub id: WorkerId,
    shared: Arc<PoolShared>,
    first: Option<Task>,
    tasks_executed: u64,
}

impl Worker {
    pub fn new(id: WorkerId, shared: Arc<PoolShared>, first: Option<Task>) -> Self {
        Self {
            id,
            shared,
            first,
            tasks_executed: 0,
        }
    }

    // main loop
    pub fn run(mut self) {
        tracing::debug!(worker = self.id, "worker started");

        let mut next = self.first.take();
        loop {
            let task = match next.take() {
                Some(task) => task,
                None => match self.next_task() {
                    Some(task) => task,
                    None => break,
                },
            };
            self.shared.run_task(task, true);
            self.tasks_executed += 1;
        }

        tracing::debug!(
            worker = self.id,
            executed = self.tasks_executed,
            "worker exiting"
        );
        PoolShared::on_worker_exit(&self.shared);
    }

    // Returns None only after this worker has removed itself from the
    // live worker count.
    fn next_task(&self) -> Option<Task> {
        let shared = &self.shared;
        let core = shared.config.core_workers;

        loop {
            let workers = shared.workers.load(Ordering::Acquire);

            // Workers above the core count wait at most keep_alive.
            let taken = if workers > core {
                shared.queue.take_timeout(shared.config.keep_alive)
            } else {
                match shared.queue.take() {
                    Some(task) => Take::Item(task),
                    None => Take::Closed,
                }
            };

            match taken {
                Take::Item(task) => return Some(task),
                Take::Closed => {
                    shared.workers.fetch_sub(1, Ordering::AcqRel);
                    return None;
                }
                Take::TimedOut => {
                    if self.try_retire(core) {
                        return None;
                    }
                }
            }
        }
    }

    // Leave only while the pool stays at or above its core size.
    fn try_retire(&self, core: usize) -> bool {
        let workers = &self.shared.workers;
        let mut current = workers.load(Ordering::Acquire);
        while current > core {
            match workers.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    tracing::debug!(worker = self.id, "idle worker reaped");
                    return true;
                }
                Err(actual) => current = actual,
            }
        }
        false
    }
}
