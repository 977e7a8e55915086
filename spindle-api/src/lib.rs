//! # Spindle API
//!
//! Vocabulary shared by the Spindle scheduling runtime and anything that
//! submits work to it.
//!
//! ## Core Components
//!
//! - **Task**: a cancellable, single-execution unit of work with a
//!   placement policy and an observable lifecycle
//! - **Placement policy**: `Unbound`, `Bound(worker)` or
//!   `UnboundExcept(worker)`
//! - **Outcome**: what an executor wants next (`Done` or `Reschedule`)
//! - **Scheduler**: the trait a pool implements to accept tasks
//! - **Errors**: policy, context, pool and promise failures
//!
//! ## Usage Example
//!
//! ```rust
//! use spindle_api::{Outcome, Task, TaskPolicy, TaskState};
//!
//! let task = Task::new(|| println!("hello"), TaskPolicy::Unbound);
//! let handle = task.handle();
//! assert_eq!(task.execute(), Outcome::Done);
//! assert_eq!(handle.state(), TaskState::Finished);
//! ```
//!
//! ## Module Organization
//!
//! - [`task`]: tasks, handles, policies and states
//! - [`scheduler`]: the `Scheduler` trait
//! - [`errors`]: error types

pub mod errors;
pub mod scheduler;
pub mod task;

pub use errors::{ContextError, PolicyError, PoolError, PromiseError};
pub use scheduler::Scheduler;
pub use task::{Outcome, Task, TaskHandle, TaskId, TaskPolicy, TaskState};
