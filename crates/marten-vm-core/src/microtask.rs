//! Microtask queue

use parking_lot::Mutex;
use std::collections::VecDeque;

use crate::context::Context;

/// A deferred callable run after the current evaluation
pub type Microtask = Box<dyn FnOnce(&Context) + Send>;

/// FIFO queue of microtasks
#[derive(Default)]
pub struct MicrotaskQueue {
    queue: Mutex<VecDeque<Microtask>>,
}

impl MicrotaskQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a task
    pub fn enqueue(&self, task: Microtask) {
        self.queue.lock().push_back(task);
    }

    /// Take the head task
    pub fn dequeue(&self) -> Option<Microtask> {
        self.queue.lock().pop_front()
    }

    /// Is the queue empty?
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Number of queued tasks
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }
}
