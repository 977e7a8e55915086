//! # Spindle
//!
//! A thread-pool task runtime. Work is submitted as [`Task`]s carrying a
//! placement policy: `Unbound` tasks go through a shared global queue and
//! run on whichever worker gets to them first, `Bound(i)` tasks always run
//! on worker `i`, and `UnboundExcept(i)` tasks go to the least loaded
//! worker other than `i`. Each worker drains its own queue before taking
//! one global task, and parks on a condition variable while idle.
//!
//! ```rust,no_run
//! use spindle::{Scheduler, Task, TaskPolicy, TaskState, ThreadPool};
//!
//! let pool = ThreadPool::with_workers(4)?;
//! pool.start()?;
//!
//! let handle = pool.submit(|| println!("on worker 2"), TaskPolicy::Bound(2))?;
//! assert_eq!(handle.wait(), TaskState::Finished);
//!
//! pool.stop();
//! # Ok::<(), spindle::PoolError>(())
//! ```
//!
//! Layers on top of the pool:
//! - [`promise`]: typed results with a single continuation
//! - [`event`]: synchronous and task-dispatched multicast callbacks
//! - [`application`]: the optional process-wide default pool
//! - [`logging`]: `tracing-subscriber` presets

pub mod application;
pub mod event;
pub mod logging;
pub mod promise;
pub mod runtime;

pub use application::Application;
pub use event::{AsyncEvent, Event, SubscriptionId};
pub use promise::{Promise, PromiseBuilder};
pub use runtime::{
    Looper, PoolConfig, PoolMetrics, PoolStatus, QueueWatcher, TaskQueue, TaskQueueGuard,
    ThreadPool,
};

pub use spindle_api::{
    ContextError, Outcome, PolicyError, PoolError, PromiseError, Scheduler, Task, TaskHandle,
    TaskId, TaskPolicy, TaskState,
};
