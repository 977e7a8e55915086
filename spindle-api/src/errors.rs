//! # Scheduler Error Types
//!
//! Failures are split by family so callers can branch on the cause instead
//! of matching on strings:
//!
//! - [`PolicyError`]: a placement policy or pool configuration that can never
//!   work. These are programmer errors and are not meant to be retried.
//! - [`ContextError`]: an operation was invoked from the wrong place, e.g.
//!   asking for "this worker" on a thread that is not a worker.
//! - [`PoolError`]: lifecycle failures of a pool (already started, shutting
//!   down, thread spawn failures), wrapping the two families above.
//! - [`PromiseError`]: a promised value will never arrive.
//!
//! ## Usage Example
//!
//! ```rust
//! use spindle_api::errors::{PolicyError, PoolError};
//!
//! fn describe(error: &PoolError) -> &'static str {
//!     match error {
//!         PoolError::Policy(PolicyError::WorkerOutOfRange { .. }) => "bad worker index",
//!         PoolError::Policy(_) => "bad policy",
//!         PoolError::Context(_) => "wrong thread",
//!         PoolError::ShuttingDown => "pool is stopping",
//!         _ => "other",
//!     }
//! }
//! ```

use thiserror::Error;

use crate::task::TaskId;

/// Configuration errors: invalid worker counts and placement policies.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    /// A pool needs at least one worker.
    #[error("Worker count must be at least 1 (got {0})")]
    InvalidWorkerCount(usize),

    /// A `Bound`/`UnboundExcept` policy names a worker the pool does not have.
    #[error("Worker index {index} is out of range for a pool of {worker_count} workers")]
    WorkerOutOfRange { index: usize, worker_count: usize },

    /// `UnboundExcept` excluded the only worker there is.
    #[error("No eligible worker: every worker is excluded (excluded worker {excluded})")]
    NoEligibleWorker { excluded: usize },
}

/// Runtime-context errors: the caller is not where the operation expects.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContextError {
    /// The calling thread is not one of the pool's workers.
    #[error("Calling thread is not a worker of this pool")]
    NotAWorker,

    /// The looper is not executing a task right now.
    #[error("No task is currently executing on this worker")]
    NoCurrentTask,

    /// The current task was built with [`Task::once`](crate::Task::once)
    /// and cannot run a second time.
    #[error("The current task cannot be rescheduled")]
    NotReschedulable,

    /// No default pool has been registered.
    #[error("No default pool is registered")]
    NoDefaultPool,

    /// A default application is already registered.
    #[error("An application is already registered")]
    ApplicationExists,
}

/// Lifecycle errors of a pool.
#[derive(Error, Debug)]
pub enum PoolError {
    /// `start` was called more than once.
    #[error("Pool has already been started")]
    AlreadyStarted,

    /// The pool was asked to stop and accepts no new work.
    #[error("Pool is shutting down")]
    ShuttingDown,

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error(transparent)]
    Context(#[from] ContextError),

    /// Catch-all for failures outside the scheduler itself (thread spawning).
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Reasons a promise can never produce its value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PromiseError {
    #[error("Promise task {0} was canceled")]
    Canceled(TaskId),

    #[error("Promise task {0} failed while executing")]
    Failed(TaskId),
}
