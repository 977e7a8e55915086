//! # Looper
//!
//! The per-worker execution loop.
//!
//! ## Core Algorithm
//! 1. Park on the pool's watcher until the local queue or the global queue
//!    has work, or a stop was requested
//! 2. Drain the local queue completely, running each pending task in FIFO
//!    order
//! 3. Take at most one task from the global queue and run it
//! 4. Repeat until stopped, but never leave while local work remains
//!
//! Local work goes first so that `Bound` tasks are not starved by a busy
//! global queue. A flood of `Bound` tasks can in turn starve this looper's
//! share of global work; producers opt into that by binding.
//!
//! A task that asks to run again (by returning `Outcome::Reschedule` or by
//! calling [`Looper::reschedule_current_task`] from inside its executor) is
//! handed back to the pool for placement once it returns.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, ThreadId};

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use spindle_api::{ContextError, Outcome, Task, TaskHandle, TaskPolicy};

use super::pool::PoolShared;
use super::queue::TaskQueue;
use super::watcher::QueueWatcher;

pub struct Looper {
    index: usize,
    local: TaskQueue,
    global: Arc<TaskQueue>,
    watcher: Arc<QueueWatcher>,
    stopped: AtomicBool,
    thread: Mutex<Option<ThreadId>>,
    current: Mutex<Option<Arc<Task>>>,
    // Reschedule request made by the running task, with its policy override.
    reschedule: Mutex<Option<Option<TaskPolicy>>>,
}

impl Looper {
    pub(crate) fn new(index: usize, global: Arc<TaskQueue>, watcher: Arc<QueueWatcher>) -> Self {
        Self {
            index,
            local: TaskQueue::new(),
            global,
            watcher,
            stopped: AtomicBool::new(false),
            thread: Mutex::new(None),
            current: Mutex::new(None),
            reschedule: Mutex::new(None),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Snapshot of the local queue length.
    pub fn queue_len(&self) -> usize {
        self.local.len()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// The task this looper is running right now, if any.
    pub fn current_task(&self) -> Option<TaskHandle> {
        self.current.lock().as_ref().map(Task::handle)
    }

    /// Appends a task to the local queue and wakes the pool's workers.
    /// Callable from any thread.
    pub fn push_back(&self, task: Arc<Task>) {
        self.local.push(task);
        self.watcher.notify_all();
    }

    /// Requests termination. In-flight and locally queued work still runs;
    /// whoever calls this is responsible for waking the watcher.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    /// Marks the currently running task to be handed back to the pool once
    /// it returns, optionally under a new policy.
    ///
    /// Only valid from inside that task's executor, i.e. on this looper's
    /// thread while a task is running. Tasks built with `Task::once` are
    /// refused.
    pub fn reschedule_current_task(&self, policy: Option<TaskPolicy>) -> Result<(), ContextError> {
        if *self.thread.lock() != Some(thread::current().id()) {
            return Err(ContextError::NotAWorker);
        }
        match self.current.lock().as_ref() {
            None => return Err(ContextError::NoCurrentTask),
            Some(task) if !task.is_reschedulable() => return Err(ContextError::NotReschedulable),
            Some(_) => {}
        }
        *self.reschedule.lock() = Some(policy);
        Ok(())
    }

    pub(crate) fn run(&self, pool: &PoolShared) {
        *self.thread.lock() = Some(thread::current().id());
        debug!(worker = self.index, "looper started");

        while !self.is_stopped() || !self.local.is_empty() {
            self.watcher
                .wait(|| !self.local.is_empty() || !self.global.is_empty() || self.is_stopped());

            while let Some(task) = self.next_local() {
                self.run_task(task, pool);
            }

            if let Some(task) = self.global.remove() {
                if task.is_runnable() {
                    self.run_task(task, pool);
                } else {
                    trace!(worker = self.index, task = %task.id(), "dropping settled global task");
                }
            }
        }

        debug!(worker = self.index, "looper stopped");
    }

    /// Takes the task that was running when the loop unwound.
    pub(crate) fn take_current(&self) -> Option<Arc<Task>> {
        self.reschedule.lock().take();
        self.current.lock().take()
    }

    fn next_local(&self) -> Option<Arc<Task>> {
        let (task, skipped) = self.local.lock().remove_runnable();
        if skipped > 0 {
            trace!(worker = self.index, skipped, "dropped settled local tasks");
        }
        task
    }

    fn run_task(&self, task: Arc<Task>, pool: &PoolShared) {
        let span = crate::task_span!(self.index, task.id());
        let _entered = span.enter();
        *self.current.lock() = Some(task.clone());

        let outcome = task.execute_with(|outcome| match (outcome, self.reschedule.lock().take()) {
            (Outcome::Done, Some(policy)) => Outcome::Reschedule(policy),
            (outcome, _) => outcome,
        });

        self.current.lock().take();

        if let Outcome::Reschedule(policy) = outcome {
            if let Some(policy) = policy {
                task.set_policy(policy);
            }
            trace!(worker = self.index, task = %task.id(), policy = ?task.policy(), "rescheduling");
            if let Err(err) = pool.dispatch(task.clone()) {
                warn!(worker = self.index, task = %task.id(), error = %err, "reschedule rejected, canceling task");
                task.cancel();
            }
        }
    }
}

impl fmt::Debug for Looper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Looper")
            .field("index", &self.index)
            .field("queue_len", &self.queue_len())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}
