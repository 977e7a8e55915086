use spindle_api::PolicyError;

/// Default prefix for worker thread names.
pub const DEFAULT_THREAD_NAME_PREFIX: &str = "spindle-worker";

/// Configuration for a [`ThreadPool`](super::ThreadPool).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of workers (loopers). Must be at least 1.
    pub worker_count: usize,

    /// Run worker 0 on the thread that calls `start` instead of spawning a
    /// thread for it. `start` then blocks until the pool stops.
    pub use_caller_thread: bool,

    /// Worker threads are named `{prefix}-{index}`.
    pub thread_name_prefix: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            worker_count: num_cpus::get().max(1),
            use_caller_thread: false,
            thread_name_prefix: DEFAULT_THREAD_NAME_PREFIX.to_string(),
        }
    }
}

impl PoolConfig {
    /// Configuration used by the application layer: one worker per CPU, the
    /// calling thread being worker 0.
    pub fn for_application() -> Self {
        Self {
            use_caller_thread: true,
            ..Self::default()
        }
    }

    pub fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    pub fn with_caller_thread(mut self, use_caller_thread: bool) -> Self {
        self.use_caller_thread = use_caller_thread;
        self
    }

    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.worker_count == 0 {
            return Err(PolicyError::InvalidWorkerCount(self.worker_count));
        }
        Ok(())
    }

    pub(crate) fn thread_name(&self, index: usize) -> String {
        format!("{}-{}", self.thread_name_prefix, index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_has_at_least_one_worker() {
        let config = PoolConfig::default();
        assert!(config.worker_count >= 1);
        assert!(!config.use_caller_thread);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_workers_rejected() {
        let config = PoolConfig::default().with_worker_count(0);
        assert_eq!(config.validate(), Err(PolicyError::InvalidWorkerCount(0)));
    }

    #[test]
    fn thread_names_use_prefix() {
        let config = PoolConfig::default().with_thread_name_prefix("io");
        assert_eq!(config.thread_name(3), "io-3");
    }

    #[test]
    fn application_config_reuses_caller() {
        let config = PoolConfig::for_application();
        assert!(config.use_caller_thread);
        assert_eq!(config.worker_count, PoolConfig::default().worker_count);
    }
}
