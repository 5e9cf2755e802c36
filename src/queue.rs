//! Closable blocking FIFO used to hand decoded requests from the reactor to a
//! connection's worker.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;

struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Blocking handoff queue.
///
/// `push` never blocks and never drops. `wait_and_pop` parks the caller until
/// an item arrives or the queue is closed and drained. Items pushed after
/// [`close`](Self::close) are still delivered to the consumer.
pub struct HandoffQueue<T> {
    state: Mutex<QueueState<T>>,
    available: Condvar,
}

impl<T> HandoffQueue<T> {
    /// Creates an empty open queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Enqueues an item and wakes one waiter.
    pub fn push(&self, item: T) {
        let mut state = self.state.lock();
        state.items.push_back(item);
        drop(state);
        self.available.notify_one();
    }

    /// Blocks until an item is available or the queue is closed.
    ///
    /// Returns `None` once the queue is closed and every queued item has been
    /// handed out.
    pub fn wait_and_pop(&self) -> Option<T> {
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                return Some(item);
            }
            if state.closed {
                return None;
            }
            self.available.wait(&mut state);
        }
    }

    /// Marks the queue closed and wakes every waiter. Idempotent.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        drop(state);
        self.available.notify_all();
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Number of queued items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Whether no items are queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for HandoffQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
