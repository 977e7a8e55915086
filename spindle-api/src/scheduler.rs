//! # Scheduler Interface
//!
//! The abstract "accept a task" surface every pool implements. Layers built
//! on top of the runtime (promises, async events) only ever talk to a pool
//! through this trait, so they hold it as `Weak<dyn Scheduler>` and never
//! keep a pool alive on their own.

use std::sync::Arc;

use crate::errors::PoolError;
use crate::task::{Task, TaskHandle, TaskPolicy};

/// Common interface for task schedulers.
pub trait Scheduler: Send + Sync {
    /// Places `task` according to its policy and wakes a worker for it.
    fn add_task(&self, task: Arc<Task>) -> Result<TaskHandle, PoolError>;

    /// Number of workers, i.e. the valid range of worker indices.
    fn worker_count(&self) -> usize;

    /// Wraps a closure in a task (see [`Task::new`]) and submits it.
    fn submit<F>(&self, work: F, policy: TaskPolicy) -> Result<TaskHandle, PoolError>
    where
        F: FnMut() + Send + 'static,
        Self: Sized,
    {
        self.add_task(Task::new(work, policy))
    }
}
