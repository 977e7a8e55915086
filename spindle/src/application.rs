//! # Application
//!
//! The process-wide default pool. Nothing in the runtime depends on it;
//! it only gives programs a single place to reach "the" pool from, the way
//! a `main` owning one scheduler would.
//!
//! ```rust,no_run
//! use spindle::{Application, PoolConfig, Scheduler, TaskPolicy};
//!
//! let app = Application::create(PoolConfig::for_application())?;
//! app.submit(
//!     || {
//!         if let Ok(app) = Application::current() {
//!             app.exit(0);
//!         }
//!     },
//!     TaskPolicy::Unbound,
//! )?;
//! let status = app.exec()?;
//! Application::release();
//! std::process::exit(status);
//! # Ok::<(), spindle::PoolError>(())
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};

use lazy_static::lazy_static;
use parking_lot::RwLock;
use tracing::info;

use spindle_api::{ContextError, PoolError, Scheduler, Task, TaskHandle, TaskPolicy};

use crate::runtime::{PoolConfig, ThreadPool};

lazy_static! {
    static ref DEFAULT_APPLICATION: RwLock<Option<Arc<Application>>> = RwLock::new(None);
}

pub struct Application {
    pool: Arc<ThreadPool>,
    exit_status: AtomicI32,
}

impl Application {
    /// Builds the pool and registers the application as the process
    /// default. Fails if one is already registered.
    pub fn create(config: PoolConfig) -> Result<Arc<Self>, PoolError> {
        let mut slot = DEFAULT_APPLICATION.write();
        if slot.is_some() {
            return Err(ContextError::ApplicationExists.into());
        }

        let app = Arc::new(Self {
            pool: ThreadPool::new(config)?,
            exit_status: AtomicI32::new(0),
        });
        *slot = Some(Arc::clone(&app));

        info!(workers = app.pool.worker_count(), "application registered");
        Ok(app)
    }

    /// The registered application.
    pub fn current() -> Result<Arc<Self>, ContextError> {
        DEFAULT_APPLICATION
            .read()
            .as_ref()
            .cloned()
            .ok_or(ContextError::NoDefaultPool)
    }

    /// Unregisters the application and hands it back. The pool keeps
    /// running until the last handle to it is dropped or it is stopped.
    pub fn release() -> Option<Arc<Self>> {
        DEFAULT_APPLICATION.write().take()
    }

    pub fn pool(&self) -> &Arc<ThreadPool> {
        &self.pool
    }

    /// Starts the pool and blocks until it has been stopped (by
    /// [`exit`](Application::exit) or by stopping the pool directly) and
    /// every worker has exited. Returns the status passed to `exit`, or 0.
    pub fn exec(&self) -> Result<i32, PoolError> {
        self.pool.start()?;
        self.pool.await_termination();
        // Collects the thread of a worker that stopped the pool itself.
        self.pool.stop();

        let status = self.exit_status.load(Ordering::Acquire);
        info!(status, "application exited");
        Ok(status)
    }

    /// Records the exit status and stops the pool. Callable from a task.
    pub fn exit(&self, status: i32) {
        self.exit_status.store(status, Ordering::Release);
        self.pool.stop();
    }

    pub fn exit_status(&self) -> i32 {
        self.exit_status.load(Ordering::Acquire)
    }

    pub fn add_task(&self, task: Arc<Task>) -> Result<TaskHandle, PoolError> {
        self.pool.add_task(task)
    }

    pub fn worker_count(&self) -> usize {
        self.pool.worker_count()
    }

    /// Index of the worker running the calling thread.
    pub fn this_worker_index(&self) -> Result<usize, ContextError> {
        Ok(self.pool.this_looper()?.index())
    }

    /// Asks the calling worker to run its current task again once it
    /// returns, optionally under `policy`.
    pub fn reschedule_current_task(&self, policy: Option<TaskPolicy>) -> Result<(), ContextError> {
        self.pool.this_looper()?.reschedule_current_task(policy)
    }
}

impl Scheduler for Application {
    fn add_task(&self, task: Arc<Task>) -> Result<TaskHandle, PoolError> {
        Application::add_task(self, task)
    }

    fn worker_count(&self) -> usize {
        Application::worker_count(self)
    }
}

impl std::fmt::Debug for Application {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Application")
            .field("pool", &self.pool)
            .field("exit_status", &self.exit_status())
            .finish()
    }
}
