//! Bounded blocking FIFO shared by submitters and workers.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Result of a timed take
#[derive(Debug)]
pub enum Take<T> {
    Item(T),
    TimedOut,
    /// Closed and fully drained.
    Closed,
}

#[derive(Debug)]
struct QueueState<T> {
    items: VecDeque<T>,
    /// Takers currently blocked waiting for an item.
    waiting: usize,
    closed: bool,
}

/// Thread-safe FIFO with a fixed capacity.
///
/// `capacity == None` is unbounded. A zero capacity queue only accepts an
/// item when a taker is already waiting for it (direct hand-off). Closing
/// the queue refuses new items but lets takers drain what is left.
#[derive(Debug)]
pub struct TaskQueue<T> {
    state: Mutex<QueueState<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: Option<usize>,
}

impl<T> TaskQueue<T> {
    pub fn bounded(capacity: usize) -> Self {
        Self::with_capacity(Some(capacity))
    }

    pub fn unbounded() -> Self {
        Self::with_capacity(None)
    }

    pub fn with_capacity(capacity: Option<usize>) -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity.unwrap_or(0).min(1024)),
                waiting: 0,
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        }
    }

    fn has_room(&self, state: &QueueState<T>) -> bool {
        match self.capacity {
            None => true,
            Some(cap) => state.items.len() < cap || state.waiting > state.items.len(),
        }
    }

    /// Enqueue without blocking. Hands the item back if full or closed.
    pub fn offer(&self, item: T) -> Result<(), T> {
        let mut state = self.state.lock();
        if state.closed || !self.has_room(&state) {
            return Err(item);
        }
        state.items.push_back(item);
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Enqueue, blocking while the queue is full. Fails only once closed.
    pub fn put(&self, item: T) -> Result<(), T> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Err(item);
            }
            if self.has_room(&state) {
                state.items.push_back(item);
                drop(state);
                self.not_empty.notify_one();
                return Ok(());
            }
            self.not_full.wait(&mut state);
        }
    }

    /// Block until an item is available. `None` once closed and empty.
    pub fn take(&self) -> Option<T> {
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                drop(state);
                self.not_full.notify_one();
                return Some(item);
            }
            if state.closed {
                return None;
            }
            state.waiting += 1;
            self.not_empty.wait(&mut state);
            state.waiting -= 1;
        }
    }

    pub fn take_timeout(&self, timeout: Duration) -> Take<T> {
        let deadline = match Instant::now().checked_add(timeout) {
            Some(deadline) => deadline,
            None => {
                return match self.take() {
                    Some(item) => Take::Item(item),
                    None => Take::Closed,
                }
            }
        };

        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                drop(state);
                self.not_full.notify_one();
                return Take::Item(item);
            }
            if state.closed {
                return Take::Closed;
            }
            state.waiting += 1;
            let timed_out = self.not_empty.wait_until(&mut state, deadline).timed_out();
            state.waiting -= 1;
            if timed_out && state.items.is_empty() {
                return if state.closed {
                    Take::Closed
                } else {
                    Take::TimedOut
                };
            }
        }
    }

    pub fn poll(&self) -> Option<T> {
        let item = self.state.lock().items.pop_front();
        if item.is_some() {
            self.not_full.notify_one();
        }
        item
    }

    /// Append `item` and pop the head in one step.
    ///
    /// Length stays the same. When the queue holds nothing, `item` itself
    /// comes straight back. Fails only once closed.
    pub fn rotate(&self, item: T) -> Result<T, T> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(item);
        }
        match state.items.pop_front() {
            Some(head) => {
                state.items.push_back(item);
                Ok(head)
            }
            None => Ok(item),
        }
    }

    /// Put an item back at the head, ignoring capacity.
    pub(crate) fn push_front(&self, item: T) {
        self.state.lock().items.push_front(item);
        self.not_empty.notify_one();
    }

    /// Remove the first item matching `pred`.
    pub fn remove_first<P>(&self, mut pred: P) -> Option<T>
    where
        P: FnMut(&T) -> bool,
    {
        let removed = {
            let mut state = self.state.lock();
            let idx = state.items.iter().position(|item| pred(item))?;
            state.items.remove(idx)
        };
        self.not_full.notify_one();
        removed
    }

    /// Remove everything currently queued.
    pub fn drain(&self) -> Vec<T> {
        let drained: Vec<T> = self.state.lock().items.drain(..).collect();
        self.not_full.notify_all();
        drained
    }

    pub fn close(&self) {
        self.state.lock().closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Items currently queued.
    ///
    /// Can briefly exceed the capacity by the number of parked takers: an
    /// item handed to a taker stays queued until that taker wakes up.
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Takers blocked in `take` or `take_timeout` right now.
    pub fn waiting_takers(&self) -> usize {
        self.state.lock().waiting
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    pub fn remaining_capacity(&self) -> Option<usize> {
        self.capacity.map(|cap| cap.saturating_sub(self.len()))
    }
}
