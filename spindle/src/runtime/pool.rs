use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use anyhow::anyhow;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info};

use spindle_api::{
    ContextError, PolicyError, PoolError, Scheduler, Task, TaskHandle, TaskPolicy,
};

use super::config::PoolConfig;
use super::looper::Looper;
use super::queue::TaskQueue;
use super::watcher::QueueWatcher;
use crate::logging;

thread_local! {
    // Pool id and looper owned by the current thread, if it is a worker.
    static CURRENT_WORKER: RefCell<Option<(u64, Arc<Looper>)>> = const { RefCell::new(None) };
}

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle status of a pool.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolStatus {
    /// Built, not started yet. Tasks may already be queued.
    Initializing = 0,
    /// Workers are running.
    Running = 1,
    /// Stop was requested; workers are draining their local queues.
    ShuttingDown = 2,
    /// Every worker has exited. The pool cannot be restarted.
    Shutdown = 3,
}

impl PoolStatus {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => PoolStatus::Initializing,
            1 => PoolStatus::Running,
            2 => PoolStatus::ShuttingDown,
            _ => PoolStatus::Shutdown,
        }
    }
}

/// Point-in-time view of a pool. Queue lengths are read one queue at a time
/// without a common lock, so they never describe one consistent instant.
#[derive(Debug, Clone)]
pub struct PoolMetrics {
    pub worker_count: usize,
    pub global_queue_len: usize,
    pub local_queue_lens: Vec<usize>,
    pub status: PoolStatus,
}

/// Where a task was delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Placement {
    Global,
    Local(usize),
}

/// State shared between the pool handle and its worker threads.
pub(crate) struct PoolShared {
    id: u64,
    config: PoolConfig,
    loopers: Vec<Arc<Looper>>,
    global: Arc<TaskQueue>,
    watcher: Arc<QueueWatcher>,
    status: AtomicU8,
    started: AtomicBool,
    stop_requested: AtomicBool,
    threads: Mutex<Vec<(usize, JoinHandle<()>)>>,
    live_workers: Mutex<usize>,
    terminated: Condvar,
}

impl PoolShared {
    /// Places a task according to its policy and wakes the right waiters.
    /// Does not look at the stop flag: reschedules and in-flight shutdown
    /// work must still land so local queues can drain.
    pub(crate) fn dispatch(&self, task: Arc<Task>) -> Result<Placement, PolicyError> {
        let policy = task.policy();
        policy.validate(self.loopers.len())?;

        let placement = match policy {
            TaskPolicy::Unbound => {
                self.global.push(task);
                // Any single idle worker can take it.
                self.watcher.notify_one();
                Placement::Global
            }
            TaskPolicy::Bound(index) => {
                self.looper_at(index)?.push_back(task);
                Placement::Local(index)
            }
            TaskPolicy::UnboundExcept(excluded) => {
                let target = self
                    .shortest_queue_except(excluded)
                    .ok_or(PolicyError::NoEligibleWorker { excluded })?;
                target.push_back(task);
                Placement::Local(target.index())
            }
        };

        crate::log_scheduler!("pool", "task_placed", pool = self.id, placement = ?placement);
        Ok(placement)
    }

    fn looper_at(&self, index: usize) -> Result<&Arc<Looper>, PolicyError> {
        self.loopers.get(index).ok_or(PolicyError::WorkerOutOfRange {
            index,
            worker_count: self.loopers.len(),
        })
    }

    /// Best-effort pick: lengths are racy snapshots, ties go to the lowest
    /// index.
    fn shortest_queue_except(&self, excluded: usize) -> Option<&Arc<Looper>> {
        self.loopers
            .iter()
            .filter(|looper| looper.index() != excluded)
            .min_by_key(|looper| looper.queue_len())
    }

    fn status(&self) -> PoolStatus {
        PoolStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    fn set_status(&self, status: PoolStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    fn signal_stop(&self) {
        if self.status() != PoolStatus::Shutdown {
            self.set_status(PoolStatus::ShuttingDown);
        }
        for looper in &self.loopers {
            looper.stop();
        }
        self.watcher.notify_all();
    }

    /// Stops every looper and joins every spawned thread except `skip`,
    /// which is put back so a later joiner can collect it.
    fn shutdown(&self, skip: Option<usize>) {
        self.signal_stop();
        self.join_workers(skip);
    }

    fn join_workers(&self, skip: Option<usize>) {
        let handles = std::mem::take(&mut *self.threads.lock());
        let mut kept = Vec::new();

        for (index, handle) in handles {
            if Some(index) == skip {
                kept.push((index, handle));
                continue;
            }
            if handle.join().is_err() {
                error!(pool = self.id, worker = index, "worker thread panicked outside of a task");
            }
        }

        if !kept.is_empty() {
            self.threads.lock().extend(kept);
        }
    }

    fn worker_exited(&self) {
        let mut live = self.live_workers.lock();
        *live = live.saturating_sub(1);
        if *live == 0 {
            self.set_status(PoolStatus::Shutdown);
            info!(pool = self.id, "all workers exited");
            self.terminated.notify_all();
        }
    }

    fn settle_if_idle(&self) {
        let live = self.live_workers.lock();
        if *live == 0 {
            self.set_status(PoolStatus::Shutdown);
            self.terminated.notify_all();
        }
    }

    fn abort_start(&self, never_started: usize) {
        self.stop_requested.store(true, Ordering::Release);
        self.signal_stop();
        let mut live = self.live_workers.lock();
        *live = live.saturating_sub(never_started);
        if *live == 0 {
            self.set_status(PoolStatus::Shutdown);
            self.terminated.notify_all();
        }
    }
}

/// A fixed-size pool of workers, each running one [`Looper`].
///
/// Tasks are placed by policy: `Unbound` tasks go to the shared global
/// queue, `Bound(i)` tasks to worker `i`'s local queue, `UnboundExcept(i)`
/// tasks to the local queue of the least loaded worker other than `i`.
///
/// # Lifecycle
/// `new` → (`add_task`…) → `start` → … → `stop`. The lifecycle is one-shot:
/// a stopped pool cannot be started again. `stop` is idempotent and may be
/// called from one of the pool's own tasks.
///
/// # Fault isolation
/// Each worker runs its looper under `catch_unwind`. A panicking task is
/// marked `Failed`, the panic is logged, and the looper restarts in place;
/// other workers are unaffected.
pub struct ThreadPool {
    shared: Arc<PoolShared>,
}

impl ThreadPool {
    /// Builds a pool. No thread is started until [`start`](ThreadPool::start).
    pub fn new(config: PoolConfig) -> Result<Arc<Self>, PolicyError> {
        config.validate()?;

        let global = Arc::new(TaskQueue::new());
        let watcher = Arc::new(QueueWatcher::new());
        let loopers = (0..config.worker_count)
            .map(|index| Arc::new(Looper::new(index, global.clone(), watcher.clone())))
            .collect();

        let shared = Arc::new(PoolShared {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            config,
            loopers,
            global,
            watcher,
            status: AtomicU8::new(PoolStatus::Initializing as u8),
            started: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            threads: Mutex::new(Vec::new()),
            live_workers: Mutex::new(0),
            terminated: Condvar::new(),
        });

        debug!(pool = shared.id, workers = shared.loopers.len(), "pool created");
        Ok(Arc::new(Self { shared }))
    }

    /// Shorthand for a pool of `worker_count` spawned workers.
    pub fn with_workers(worker_count: usize) -> Result<Arc<Self>, PolicyError> {
        Self::new(PoolConfig::default().with_worker_count(worker_count))
    }

    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    pub fn worker_count(&self) -> usize {
        self.shared.loopers.len()
    }

    pub fn status(&self) -> PoolStatus {
        self.shared.status()
    }

    /// Places `task` by its policy and wakes the worker(s) that may run it.
    pub fn add_task(&self, task: Arc<Task>) -> Result<TaskHandle, PoolError> {
        if self.shared.stop_requested.load(Ordering::Acquire) {
            return Err(PoolError::ShuttingDown);
        }
        let handle = task.handle();
        self.shared.dispatch(task)?;
        Ok(handle)
    }

    /// Starts the workers.
    ///
    /// With `use_caller_thread` the calling thread becomes worker 0 and this
    /// call only returns once the pool has been stopped and worker 0 has
    /// drained its local queue.
    pub fn start(&self) -> Result<(), PoolError> {
        let shared = &self.shared;
        if shared.stop_requested.load(Ordering::Acquire) {
            return Err(PoolError::ShuttingDown);
        }
        if shared.started.swap(true, Ordering::AcqRel) {
            return Err(PoolError::AlreadyStarted);
        }

        let worker_count = shared.loopers.len();
        let use_caller = shared.config.use_caller_thread;
        let first_spawned = usize::from(use_caller);

        *shared.live_workers.lock() = worker_count;
        shared.set_status(PoolStatus::Running);

        let dispatch = logging::current_subscriber();
        for index in first_spawned..worker_count {
            let worker_shared = Arc::clone(shared);
            let dispatch = dispatch.clone();
            let spawned = thread::Builder::new()
                .name(shared.config.thread_name(index))
                .spawn(move || {
                    tracing::dispatcher::with_default(&dispatch, || worker_main(&worker_shared, index))
                });

            match spawned {
                Ok(handle) => shared.threads.lock().push((index, handle)),
                Err(err) => {
                    // This worker, the ones after it and a caller-thread worker 0
                    // will never run.
                    shared.abort_start(worker_count - index + first_spawned);
                    return Err(PoolError::Other(
                        anyhow!(err).context(format!("failed to spawn worker {index}")),
                    ));
                }
            }
        }

        info!(pool = shared.id, workers = worker_count, caller_thread = use_caller, "pool started");

        if use_caller {
            worker_main(shared, 0);
        }
        Ok(())
    }

    /// Stops the pool: every looper finishes its local queue and exits, and
    /// every spawned thread is joined. Idempotent.
    ///
    /// Called from one of this pool's workers, the shutdown is queued as a
    /// task bound to that worker and runs once the current task returns;
    /// that worker's own thread is left for a later `stop` (or drop) to join.
    /// Called from any other thread, it returns only after every worker has
    /// exited, even if a queued shutdown is already joining them.
    pub fn stop(&self) {
        let first = !self.shared.stop_requested.swap(true, Ordering::AcqRel);

        if let Some(looper) = current_looper(self.shared.id) {
            if first {
                let index = looper.index();
                let shared: Weak<PoolShared> = Arc::downgrade(&self.shared);
                looper.push_back(Task::new(
                    move || {
                        if let Some(shared) = shared.upgrade() {
                            shared.shutdown(Some(index));
                        }
                    },
                    TaskPolicy::Bound(index),
                ));
                info!(pool = self.shared.id, worker = index, "stop requested from a worker, shutdown queued");
            }
            return;
        }

        if first {
            info!(pool = self.shared.id, "stopping pool");
            self.shared.signal_stop();
        }
        self.shared.join_workers(None);

        // A queued self-stop may be joining the handles taken above; wait
        // for its workers, then collect the handle it put back.
        {
            let mut live = self.shared.live_workers.lock();
            while *live > 0 {
                self.shared.terminated.wait(&mut live);
            }
        }
        self.shared.join_workers(None);
        self.shared.settle_if_idle();
    }

    /// Blocks until the pool has been stopped and every worker has exited.
    pub fn await_termination(&self) {
        let mut live = self.shared.live_workers.lock();
        while *live > 0 || !self.shared.stop_requested.load(Ordering::Acquire) {
            self.shared.terminated.wait(&mut live);
        }
    }

    /// The looper owned by the calling thread.
    pub fn this_looper(&self) -> Result<Arc<Looper>, ContextError> {
        current_looper(self.shared.id).ok_or(ContextError::NotAWorker)
    }

    pub fn looper(&self, index: usize) -> Result<Arc<Looper>, PolicyError> {
        self.shared.looper_at(index).cloned()
    }

    pub fn loopers(&self) -> &[Arc<Looper>] {
        &self.shared.loopers
    }

    pub fn metrics(&self) -> PoolMetrics {
        PoolMetrics {
            worker_count: self.worker_count(),
            global_queue_len: self.shared.global.len(),
            local_queue_lens: self.shared.loopers.iter().map(|l| l.queue_len()).collect(),
            status: self.status(),
        }
    }
}

impl Scheduler for ThreadPool {
    fn add_task(&self, task: Arc<Task>) -> Result<TaskHandle, PoolError> {
        ThreadPool::add_task(self, task)
    }

    fn worker_count(&self) -> usize {
        ThreadPool::worker_count(self)
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadPool")
            .field("id", &self.shared.id)
            .field("workers", &self.shared.loopers.len())
            .field("status", &self.status())
            .finish()
    }
}

fn current_looper(pool_id: u64) -> Option<Arc<Looper>> {
    CURRENT_WORKER.with(|slot| {
        slot.borrow()
            .as_ref()
            .filter(|(id, _)| *id == pool_id)
            .map(|(_, looper)| Arc::clone(looper))
    })
}

fn worker_main(shared: &Arc<PoolShared>, index: usize) {
    let looper = Arc::clone(&shared.loopers[index]);
    let previous = CURRENT_WORKER.with(|slot| slot.replace(Some((shared.id, looper.clone()))));

    loop {
        match panic::catch_unwind(AssertUnwindSafe(|| looper.run(shared))) {
            Ok(()) => break,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                match looper.take_current() {
                    Some(task) => {
                        task.mark_failed();
                        error!(pool = shared.id, worker = index, task = %task.id(), panic = %message, "task panicked, restarting looper");
                    }
                    None => {
                        error!(pool = shared.id, worker = index, panic = %message, "looper panicked, restarting");
                    }
                }
            }
        }
    }

    CURRENT_WORKER.with(|slot| slot.replace(previous));
    shared.worker_exited();
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn unstarted(workers: usize) -> Arc<ThreadPool> {
        ThreadPool::with_workers(workers).unwrap()
    }

    #[test]
    fn zero_workers_is_a_configuration_error() {
        let result = ThreadPool::with_workers(0);
        assert_eq!(result.unwrap_err(), PolicyError::InvalidWorkerCount(0));
    }

    #[test]
    fn unbound_goes_to_global_queue() {
        let pool = unstarted(2);
        pool.add_task(Task::noop(TaskPolicy::Unbound)).unwrap();
        let metrics = pool.metrics();
        assert_eq!(metrics.global_queue_len, 1);
        assert_eq!(metrics.local_queue_lens, vec![0, 0]);
        assert_eq!(metrics.status, PoolStatus::Initializing);
    }

    #[test]
    fn bound_goes_to_that_looper() {
        let pool = unstarted(3);
        pool.add_task(Task::noop(TaskPolicy::Bound(2))).unwrap();
        assert_eq!(pool.looper(2).unwrap().queue_len(), 1);
        assert_eq!(pool.looper(0).unwrap().queue_len(), 0);
    }

    #[test]
    fn unbound_except_picks_shortest_eligible_queue() {
        let pool = unstarted(3);
        for _ in 0..5 {
            pool.add_task(Task::noop(TaskPolicy::Bound(0))).unwrap();
        }
        for _ in 0..3 {
            pool.add_task(Task::noop(TaskPolicy::Bound(2))).unwrap();
        }

        pool.add_task(Task::noop(TaskPolicy::UnboundExcept(0))).unwrap();
        assert_eq!(pool.metrics().local_queue_lens, vec![5, 1, 3]);
    }

    #[test]
    fn unbound_except_ties_go_to_lowest_index() {
        let pool = unstarted(4);
        pool.add_task(Task::noop(TaskPolicy::UnboundExcept(1))).unwrap();
        assert_eq!(pool.metrics().local_queue_lens, vec![1, 0, 0, 0]);

        pool.add_task(Task::noop(TaskPolicy::UnboundExcept(0))).unwrap();
        assert_eq!(pool.metrics().local_queue_lens, vec![1, 1, 0, 0]);

        pool.add_task(Task::noop(TaskPolicy::UnboundExcept(3))).unwrap();
        assert_eq!(pool.metrics().local_queue_lens, vec![1, 1, 1, 0]);
    }

    #[test]
    fn policy_errors_are_reported() {
        let pool = unstarted(2);
        let err = pool.add_task(Task::noop(TaskPolicy::Bound(2))).unwrap_err();
        assert!(matches!(
            err,
            PoolError::Policy(PolicyError::WorkerOutOfRange { index: 2, worker_count: 2 })
        ));

        let single = unstarted(1);
        let err = single.add_task(Task::noop(TaskPolicy::UnboundExcept(0))).unwrap_err();
        assert!(matches!(err, PoolError::Policy(PolicyError::NoEligibleWorker { excluded: 0 })));
    }

    #[test]
    fn this_looper_outside_workers_fails() {
        let pool = unstarted(1);
        assert_eq!(pool.this_looper().unwrap_err(), ContextError::NotAWorker);
    }

    #[test]
    fn start_twice_fails() {
        let pool = unstarted(1);
        pool.start().unwrap();
        assert!(matches!(pool.start(), Err(PoolError::AlreadyStarted)));
        pool.stop();
        assert_eq!(pool.status(), PoolStatus::Shutdown);
    }

    #[test]
    fn stop_before_start_is_final() {
        let pool = unstarted(2);
        pool.stop();
        assert_eq!(pool.status(), PoolStatus::Shutdown);
        assert!(matches!(pool.start(), Err(PoolError::ShuttingDown)));
        assert!(matches!(
            pool.add_task(Task::noop(TaskPolicy::Unbound)),
            Err(PoolError::ShuttingDown)
        ));
        pool.await_termination();
    }

    #[test]
    fn workers_know_their_looper() {
        let pool = unstarted(3);
        let seen = Arc::new(AtomicUsize::new(usize::MAX));
        let weak = Arc::downgrade(&pool);
        let record = seen.clone();
        let handle = pool
            .add_task(Task::new(
                move || {
                    if let Some(pool) = weak.upgrade() {
                        if let Ok(looper) = pool.this_looper() {
                            record.store(looper.index(), Ordering::SeqCst);
                        }
                    }
                },
                TaskPolicy::Bound(2),
            ))
            .unwrap();

        pool.start().unwrap();
        assert_eq!(handle.wait_for(Duration::from_secs(5)), spindle_api::TaskState::Finished);
        assert_eq!(seen.load(Ordering::SeqCst), 2);
        pool.stop();
    }

    #[test]
    fn panic_message_extracts_strings() {
        let payload: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(payload.as_ref()), "static");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
        let payload: Box<dyn Any + Send> = Box::new(7u32);
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }
}
