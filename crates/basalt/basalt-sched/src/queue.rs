//! Bounded blocking hand-off queue with close semantics.
//!
//! Decouples network I/O from protocol parsing: any number of pushers and
//! poppers, FIFO among completed operations, and a `close()` that fails
//! further pushes while letting poppers drain what is already queued.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("push on closed queue")]
    Closed,
    #[error("pop on closed and drained queue")]
    Drained,
}

struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Fixed-capacity blocking FIFO.
pub struct BlockingQueue<T> {
    state: Mutex<QueueState<T>>,
    not_full: Condvar,
    not_empty: Condvar,
    capacity: usize,
}

impl<T> BlockingQueue<T> {
    /// # Panics
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be > 0");
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until there is room or the queue closes; fails with
    /// [`QueueError::Closed`] once closed.
    pub fn push(&self, value: T) -> Result<(), QueueError> {
        let mut state = self.lock();
        while state.items.len() >= self.capacity && !state.closed {
            state = self
                .not_full
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        if state.closed {
            return Err(QueueError::Closed);
        }
        state.items.push_back(value);
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Block until an item is available or the queue closes. Returns `None`
    /// exactly when the queue is closed and drained.
    pub fn pop(&self) -> Option<T> {
        let mut state = self.lock();
        while state.items.is_empty() && !state.closed {
            state = self
                .not_empty
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        let value = state.items.pop_front();
        drop(state);
        if value.is_some() {
            self.not_full.notify_one();
        }
        value
    }

    /// Like [`pop`](Self::pop), but the closed-and-drained terminal case is
    /// an error instead of `None`.
    pub fn take(&self) -> Result<T, QueueError> {
        self.pop().ok_or(QueueError::Drained)
    }

    /// Idempotent. Wakes every blocked pusher and popper.
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        drop(state);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
