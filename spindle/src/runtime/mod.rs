//! # Runtime
//!
//! The scheduling core: a fixed set of workers, each running a [`Looper`]
//! over its own local [`TaskQueue`] plus the pool-wide global queue, parked
//! on one shared [`QueueWatcher`] while idle.
//!
//! ## Components
//!
//! - [`ThreadPool`]: lifecycle, placement and worker identity
//! - [`Looper`]: the per-worker loop, local-first
//! - [`TaskQueue`]: locked FIFO with a pre-locked guard
//! - [`QueueWatcher`]: condvar-based park/wake
//! - [`PoolConfig`]: worker count, caller-thread mode, thread naming

pub mod config;
pub mod looper;
pub mod pool;
pub mod queue;
pub mod watcher;

pub use config::{PoolConfig, DEFAULT_THREAD_NAME_PREFIX};
pub use looper::Looper;
pub use pool::{PoolMetrics, PoolStatus, ThreadPool};
pub use queue::{TaskQueue, TaskQueueGuard};
pub use watcher::QueueWatcher;
