//! # Tasks
//!
//! A [`Task`] is a cancellable unit of work with a placement policy and an
//! observable lifecycle:
//!
//! ```text
//! Pending ──► Executing ──► Finished
//!    │            │    └──► Failed     (executor panicked)
//!    │            └───────► Pending    (executor asked to be rescheduled)
//!    └──► Canceled ◄──────── (cancel from Pending or Executing)
//! ```
//!
//! Only the looper running a task moves it along `Pending → Executing →
//! Finished`; anyone holding a [`TaskHandle`] may cancel it. Cancellation is
//! cooperative: a task already executing runs to completion, but stays
//! `Canceled` and is never rescheduled.
//!
//! Tasks are always shared as `Arc<Task>`: a queue, a handle and a
//! continuation closure may all hold the same task, and the last holder
//! frees it.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::trace;

use crate::errors::PolicyError;

/// Process-wide unique, monotonically increasing task identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

impl TaskId {
    /// Allocates the next identifier.
    pub fn next() -> Self {
        TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle state of a task.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Waiting in a queue (or not yet submitted).
    Pending = 0,
    /// A looper is running the executor.
    Executing = 1,
    /// The executor returned `Outcome::Done`.
    Finished = 2,
    /// Cancellation was requested before the task finished.
    Canceled = 3,
    /// The executor panicked; the worker contained the fault.
    Failed = 4,
}

impl TaskState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => TaskState::Pending,
            1 => TaskState::Executing,
            2 => TaskState::Finished,
            3 => TaskState::Canceled,
            _ => TaskState::Failed,
        }
    }

    /// `Finished`, `Canceled` and `Failed` never change again.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Finished | TaskState::Canceled | TaskState::Failed)
    }
}

/// Which workers may run a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskPolicy {
    /// Any worker; delivered to the shared global queue.
    #[default]
    Unbound,
    /// Exactly this worker; delivered to its local queue.
    Bound(usize),
    /// Any worker but this one; delivered to the eligible worker with the
    /// shortest local queue.
    UnboundExcept(usize),
}

impl TaskPolicy {
    /// Checks the policy against a pool of `worker_count` workers.
    pub fn validate(&self, worker_count: usize) -> Result<(), PolicyError> {
        match *self {
            TaskPolicy::Unbound => Ok(()),
            TaskPolicy::Bound(index) | TaskPolicy::UnboundExcept(index) if index >= worker_count => {
                Err(PolicyError::WorkerOutOfRange { index, worker_count })
            }
            TaskPolicy::UnboundExcept(excluded) if worker_count == 1 => {
                Err(PolicyError::NoEligibleWorker { excluded })
            }
            _ => Ok(()),
        }
    }

    /// Whether the worker at `index` may run a task with this policy.
    pub fn admits(&self, index: usize) -> bool {
        match *self {
            TaskPolicy::Unbound => true,
            TaskPolicy::Bound(bound) => bound == index,
            TaskPolicy::UnboundExcept(excluded) => excluded != index,
        }
    }
}

/// What an executor wants to happen after it returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The work is complete.
    Done,
    /// Run the executor again later, optionally under a different policy.
    Reschedule(Option<TaskPolicy>),
}

type Executor = Box<dyn FnMut() -> Outcome + Send>;

/// A cancellable unit of work.
pub struct Task {
    id: TaskId,
    policy: Mutex<TaskPolicy>,
    state: AtomicU8,
    // Never replaced after construction; the lock only serializes calls.
    executor: Mutex<Option<Executor>>,
    reschedulable: bool,
    settled: Mutex<()>,
    settled_cond: Condvar,
}

impl Task {
    fn build(executor: Option<Executor>, reschedulable: bool, policy: TaskPolicy) -> Arc<Self> {
        Arc::new(Self {
            id: TaskId::next(),
            policy: Mutex::new(policy),
            state: AtomicU8::new(TaskState::Pending as u8),
            executor: Mutex::new(executor),
            reschedulable,
            settled: Mutex::new(()),
            settled_cond: Condvar::new(),
        })
    }

    /// Creates a task. Arguments are bound by the closure's captures.
    ///
    /// The closure is kept for the task's whole life, so a run that asks
    /// its looper to reschedule it calls the same closure again.
    pub fn new<F>(mut work: F, policy: TaskPolicy) -> Arc<Self>
    where
        F: FnMut() + Send + 'static,
    {
        Self::build(
            Some(Box::new(move || {
                work();
                Outcome::Done
            })),
            true,
            policy,
        )
    }

    /// Creates a task around work that can only run once, e.g. a closure
    /// that moves its captures out. Such a task cannot be rescheduled.
    pub fn once<F>(work: F, policy: TaskPolicy) -> Arc<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut work = Some(work);
        Self::build(
            Some(Box::new(move || {
                if let Some(work) = work.take() {
                    work();
                }
                Outcome::Done
            })),
            false,
            policy,
        )
    }

    /// Creates a task whose executor may ask to run again by returning
    /// [`Outcome::Reschedule`].
    pub fn repeating<F>(work: F, policy: TaskPolicy) -> Arc<Self>
    where
        F: FnMut() -> Outcome + Send + 'static,
    {
        Self::build(Some(Box::new(work)), true, policy)
    }

    /// Creates a task without an executor. Executing it only walks the
    /// state machine.
    pub fn noop(policy: TaskPolicy) -> Arc<Self> {
        Self::build(None, true, policy)
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// False for [`Task::once`] tasks, whose work is gone after one run.
    pub fn is_reschedulable(&self) -> bool {
        self.reschedulable
    }

    pub fn policy(&self) -> TaskPolicy {
        *self.policy.lock()
    }

    /// Replaces the placement policy. Only meaningful while the task is
    /// not sitting in a queue.
    pub fn set_policy(&self, policy: TaskPolicy) {
        *self.policy.lock() = policy;
    }

    /// True once the task reached `Finished`, `Canceled` or `Failed`.
    pub fn is_finished(&self) -> bool {
        self.state().is_terminal()
    }

    /// True if a looper that dequeues this task should run it.
    pub fn is_runnable(&self) -> bool {
        self.state() == TaskState::Pending
    }

    /// Runs the executor once. See [`Task::execute_with`].
    pub fn execute(&self) -> Outcome {
        self.execute_with(|outcome| outcome)
    }

    /// Runs the executor once, letting `resolve` adjust the outcome before
    /// the final state transition is made.
    ///
    /// Returns `Outcome::Done` without running anything if the task is not
    /// `Pending`. A panic in the executor propagates to the caller and
    /// leaves the task `Executing`; the caller is expected to
    /// [`mark_failed`](Task::mark_failed) it.
    ///
    /// Must not be called concurrently for the same task.
    pub fn execute_with<R>(&self, resolve: R) -> Outcome
    where
        R: FnOnce(Outcome) -> Outcome,
    {
        if !self.transition(TaskState::Pending, TaskState::Executing) {
            trace!(task = %self.id, state = ?self.state(), "skipping non-pending task");
            return Outcome::Done;
        }

        let outcome = match self.executor.lock().as_mut() {
            Some(executor) => executor(),
            None => Outcome::Done,
        };

        match resolve(outcome) {
            Outcome::Done => {
                if self.transition(TaskState::Executing, TaskState::Finished) {
                    self.notify_settled();
                }
                Outcome::Done
            }
            Outcome::Reschedule(policy) => {
                if self.transition(TaskState::Executing, TaskState::Pending) {
                    Outcome::Reschedule(policy)
                } else {
                    // Canceled while running: never comes back.
                    Outcome::Done
                }
            }
        }
    }

    /// Requests cancellation. Returns `false` if the task had already
    /// settled.
    pub fn cancel(&self) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if TaskState::from_u8(current).is_terminal() {
                return false;
            }
            match self.state.compare_exchange_weak(
                current,
                TaskState::Canceled as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        trace!(task = %self.id, "canceled");
        self.notify_settled();
        true
    }

    /// Moves an executing task to `Failed` after its executor panicked.
    pub fn mark_failed(&self) -> bool {
        let failed = self.transition(TaskState::Executing, TaskState::Failed);
        if failed {
            self.notify_settled();
        }
        failed
    }

    /// Blocks until the task settles and returns the terminal state.
    pub fn wait(&self) -> TaskState {
        let mut guard = self.settled.lock();
        loop {
            let state = self.state();
            if state.is_terminal() {
                return state;
            }
            self.settled_cond.wait(&mut guard);
        }
    }

    /// Like [`wait`](Task::wait) but gives up after `timeout`, returning
    /// whatever state the task is in by then.
    pub fn wait_for(&self, timeout: Duration) -> TaskState {
        let deadline = Instant::now() + timeout;
        let mut guard = self.settled.lock();
        loop {
            let state = self.state();
            if state.is_terminal() {
                return state;
            }
            if self.settled_cond.wait_until(&mut guard, deadline).timed_out() {
                return self.state();
            }
        }
    }

    /// A read-only view for producers.
    pub fn handle(self: &Arc<Self>) -> TaskHandle {
        TaskHandle { task: Arc::clone(self) }
    }

    fn transition(&self, from: TaskState, to: TaskState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn notify_settled(&self) {
        let _guard = self.settled.lock();
        self.settled_cond.notify_all();
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("policy", &self.policy())
            .field("state", &self.state())
            .field("has_executor", &self.executor.try_lock().map(|e| e.is_some()))
            .finish()
    }
}

/// Read-only view of a task: observe it, wait for it, or cancel it, but
/// never run or replace its work.
#[derive(Clone, Debug)]
pub struct TaskHandle {
    task: Arc<Task>,
}

impl TaskHandle {
    pub fn id(&self) -> TaskId {
        self.task.id()
    }

    pub fn state(&self) -> TaskState {
        self.task.state()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub fn cancel(&self) -> bool {
        self.task.cancel()
    }

    pub fn wait(&self) -> TaskState {
        self.task.wait()
    }

    pub fn wait_for(&self, timeout: Duration) -> TaskState {
        self.task.wait_for(timeout)
    }
}
