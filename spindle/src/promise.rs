//! # Promises
//!
//! A [`Promise`] is a task that produces a typed value, plus a single
//! continuation slot. The value lives in an `Option<T>` guarded by the same
//! mutex as the continuation, so whichever of "task finished" and "`then`
//! registered" happens second submits the continuation, exactly once.
//!
//! ```rust,no_run
//! use spindle::{Promise, ThreadPool};
//!
//! let pool = ThreadPool::with_workers(2)?;
//! pool.start()?;
//!
//! let answer = Promise::spawn(&pool, || 6 * 7)?;
//! answer.then(|value| println!("got {value}"))?;
//! assert_eq!(answer.result()?, 42);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! `result()` parks the caller until the task settles. Calling it from a
//! worker on a promise that can only run on that same worker never returns.
//!
//! A promise canceled while its task is executing discards the value and
//! never runs its continuation.

use std::fmt;
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::Mutex;
use tracing::{debug, warn};

use spindle_api::{
    PoolError, PromiseError, Scheduler, Task, TaskHandle, TaskId, TaskPolicy, TaskState,
};

type Continuation<T> = Box<dyn FnOnce(T) + Send>;

struct Slot<T> {
    value: Option<T>,
    continuation: Option<Continuation<T>>,
}

struct PromiseState<T> {
    slot: Mutex<Slot<T>>,
    continuation_policy: TaskPolicy,
    scheduler: Weak<dyn Scheduler>,
    // Set right after the task is built; the task reads it back to see
    // whether it was canceled mid-run.
    task: OnceLock<Weak<Task>>,
}

impl<T> PromiseState<T>
where
    T: Clone + Send + 'static,
{
    fn complete(&self, value: T) {
        let continuation = {
            let mut slot = self.slot.lock();
            if self.is_canceled() {
                let dropped = slot.continuation.take();
                debug!(continuation = dropped.is_some(), "promise canceled while executing, value discarded");
                return;
            }
            slot.value = Some(value.clone());
            slot.continuation.take()
        };

        if let Some(continuation) = continuation {
            if let Err(err) = self.submit_continuation(continuation, value) {
                warn!(error = %err, "promise continuation dropped");
            }
        }
    }

    fn is_canceled(&self) -> bool {
        self.task
            .get()
            .and_then(Weak::upgrade)
            .is_some_and(|task| task.state() == TaskState::Canceled)
    }

    fn submit_continuation(
        &self,
        continuation: Continuation<T>,
        value: T,
    ) -> Result<TaskHandle, PoolError> {
        let scheduler = self.scheduler.upgrade().ok_or(PoolError::ShuttingDown)?;
        scheduler.add_task(Task::once(move || continuation(value), self.continuation_policy))
    }
}

/// Handle to a value being computed on a pool.
pub struct Promise<T> {
    task: Arc<Task>,
    state: Arc<PromiseState<T>>,
}

impl<T> Promise<T>
where
    T: Clone + Send + 'static,
{
    /// Submits `work` as an `Unbound` task whose continuation is also
    /// `Unbound`.
    pub fn spawn<S, F>(scheduler: &Arc<S>, work: F) -> Result<Self, PoolError>
    where
        S: Scheduler + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        PromiseBuilder::default().spawn(scheduler, work)
    }

    pub fn builder() -> PromiseBuilder {
        PromiseBuilder::default()
    }

    /// Registers the continuation that receives the value.
    ///
    /// If the value is already available the continuation is submitted
    /// right away and its handle returned. Otherwise it is stored (replacing
    /// any earlier one) and submitted by the task once it finishes; `None`
    /// is returned. A continuation stored on a promise that is canceled or
    /// fails never runs.
    pub fn then<F>(&self, continuation: F) -> Result<Option<TaskHandle>, PoolError>
    where
        F: FnOnce(T) + Send + 'static,
    {
        let mut slot = self.state.slot.lock();
        match slot.value.clone() {
            Some(value) => {
                drop(slot);
                self.state
                    .submit_continuation(Box::new(continuation), value)
                    .map(Some)
            }
            None => {
                if slot.continuation.replace(Box::new(continuation)).is_some() {
                    debug!(task = %self.task.id(), "continuation replaced");
                }
                Ok(None)
            }
        }
    }

    /// True once the value is available. Stays false for a promise that
    /// was canceled or whose task failed, even though
    /// [`result`](Promise::result) no longer blocks for those.
    pub fn is_ready(&self) -> bool {
        self.task.state() == TaskState::Finished
    }

    /// Blocks until the task settles and returns a copy of the value.
    pub fn result(&self) -> Result<T, PromiseError> {
        let id = self.task.id();
        match self.task.wait() {
            TaskState::Finished => self
                .state
                .slot
                .lock()
                .value
                .clone()
                .ok_or(PromiseError::Failed(id)),
            TaskState::Canceled => Err(PromiseError::Canceled(id)),
            _ => Err(PromiseError::Failed(id)),
        }
    }

    /// The value, if it has been produced.
    pub fn try_get(&self) -> Option<T> {
        self.state.slot.lock().value.clone()
    }

    pub fn handle(&self) -> TaskHandle {
        self.task.handle()
    }

    pub fn id(&self) -> TaskId {
        self.task.id()
    }

    /// Cancels the underlying task. See [`Task::cancel`].
    ///
    /// Returns `false` once the value has been produced. Canceling through
    /// [`handle`](Promise::handle) skips that check, so a cancel racing the
    /// end of the task may still let the continuation run.
    pub fn cancel(&self) -> bool {
        let slot = self.state.slot.lock();
        if slot.value.is_some() {
            return false;
        }
        self.task.cancel()
    }
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            task: Arc::clone(&self.task),
            state: Arc::clone(&self.state),
        }
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("task", &self.task.id())
            .field("state", &self.task.state())
            .field("continuation_policy", &self.state.continuation_policy)
            .finish()
    }
}

/// Placement options for a promise's task and its continuation.
#[derive(Debug, Clone, Copy, Default)]
pub struct PromiseBuilder {
    task_policy: TaskPolicy,
    continuation_policy: TaskPolicy,
}

impl PromiseBuilder {
    pub fn task_policy(mut self, policy: TaskPolicy) -> Self {
        self.task_policy = policy;
        self
    }

    pub fn continuation_policy(mut self, policy: TaskPolicy) -> Self {
        self.continuation_policy = policy;
        self
    }

    /// Builds the promise task and submits it. Both policies are checked
    /// against the scheduler's worker count first.
    pub fn spawn<T, S, F>(self, scheduler: &Arc<S>, work: F) -> Result<Promise<T>, PoolError>
    where
        T: Clone + Send + 'static,
        S: Scheduler + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.continuation_policy.validate(scheduler.worker_count())?;

        let weak: Weak<S> = Arc::downgrade(scheduler);
        let state = Arc::new(PromiseState {
            slot: Mutex::new(Slot {
                value: None,
                continuation: None,
            }),
            continuation_policy: self.continuation_policy,
            scheduler: weak,
            task: OnceLock::new(),
        });

        let completion = Arc::clone(&state);
        let task = Task::once(
            move || {
                let value = work();
                completion.complete(value);
            },
            self.task_policy,
        );
        let _ = state.task.set(Arc::downgrade(&task));
        debug!(task = %task.id(), policy = ?self.task_policy, "promise spawned");
        scheduler.add_task(Arc::clone(&task))?;
        Ok(Promise { task, state })
    }
}
