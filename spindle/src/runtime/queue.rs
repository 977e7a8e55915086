use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{Mutex, MutexGuard};

use spindle_api::Task;

/// A thread-safe FIFO of task handles.
///
/// Insertion order is execution order. The element count is mirrored in an
/// atomic so other threads can read [`len`](TaskQueue::len) without taking
/// the lock; such reads are snapshots and may be stale by the time they are
/// used. They feed load comparisons only, never correctness decisions.
///
/// Operations on `TaskQueue` lock internally. Code that needs several
/// operations under one acquisition takes a [`TaskQueueGuard`] with
/// [`lock`](TaskQueue::lock) and uses its non-locking equivalents.
pub struct TaskQueue {
    tasks: Mutex<VecDeque<Arc<Task>>>,
    len: AtomicUsize,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(VecDeque::new()),
            len: AtomicUsize::new(0),
        }
    }

    pub fn push(&self, task: Arc<Task>) {
        self.lock().push(task);
    }

    /// Discards the front task. Returns `false` if the queue was empty.
    pub fn pop(&self) -> bool {
        self.lock().pop()
    }

    /// Removes and returns the front task.
    pub fn remove(&self) -> Option<Arc<Task>> {
        self.lock().remove()
    }

    pub fn peek(&self) -> Option<Arc<Task>> {
        self.lock().peek()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the number of queued tasks.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    /// Drops every queued task and returns how many there were.
    pub fn clear(&self) -> usize {
        let mut guard = self.lock();
        let dropped = guard.tasks.len();
        guard.tasks.clear();
        self.len.store(0, Ordering::Release);
        dropped
    }

    /// Acquires the queue lock for a sequence of non-locking operations.
    pub fn lock(&self) -> TaskQueueGuard<'_> {
        TaskQueueGuard {
            tasks: self.tasks.lock(),
            len: &self.len,
        }
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueue").field("len", &self.len()).finish()
    }
}

/// Exclusive access to a [`TaskQueue`]; every operation here runs under the
/// lock already held.
pub struct TaskQueueGuard<'a> {
    tasks: MutexGuard<'a, VecDeque<Arc<Task>>>,
    len: &'a AtomicUsize,
}

impl TaskQueueGuard<'_> {
    pub fn push(&mut self, task: Arc<Task>) {
        self.tasks.push_back(task);
        self.len.fetch_add(1, Ordering::Release);
    }

    pub fn pop(&mut self) -> bool {
        self.remove().is_some()
    }

    pub fn remove(&mut self) -> Option<Arc<Task>> {
        let task = self.tasks.pop_front()?;
        self.len.fetch_sub(1, Ordering::Release);
        Some(task)
    }

    pub fn peek(&self) -> Option<Arc<Task>> {
        self.tasks.front().cloned()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Removes tasks from the front until one is still runnable, dropping
    /// canceled and already-settled tasks on the way. Returns the runnable
    /// task (if any) and how many were dropped.
    pub fn remove_runnable(&mut self) -> (Option<Arc<Task>>, usize) {
        let mut skipped = 0;
        while let Some(task) = self.remove() {
            if task.is_runnable() {
                return (Some(task), skipped);
            }
            skipped += 1;
        }
        (None, skipped)
    }
}
