use spindle_api::errors::{ContextError, PolicyError, PoolError, PromiseError};
use spindle_api::{Task, TaskPolicy};
use std::error::Error;
use anyhow::anyhow;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_error_display() {
        assert_eq!(
            PolicyError::InvalidWorkerCount(0).to_string(),
            "Worker count must be at least 1 (got 0)"
        );
        assert_eq!(
            PolicyError::WorkerOutOfRange { index: 4, worker_count: 2 }.to_string(),
            "Worker index 4 is out of range for a pool of 2 workers"
        );
        assert_eq!(
            PolicyError::NoEligibleWorker { excluded: 0 }.to_string(),
            "No eligible worker: every worker is excluded (excluded worker 0)"
        );
    }

    #[test]
    fn test_context_error_display() {
        assert_eq!(ContextError::NotAWorker.to_string(), "Calling thread is not a worker of this pool");
        assert_eq!(ContextError::NoCurrentTask.to_string(), "No task is currently executing on this worker");
        assert_eq!(ContextError::NotReschedulable.to_string(), "The current task cannot be rescheduled");
        assert_eq!(ContextError::NoDefaultPool.to_string(), "No default pool is registered");
        assert_eq!(ContextError::ApplicationExists.to_string(), "An application is already registered");
    }

    #[test]
    fn test_pool_error_is_transparent_over_families() {
        let error: PoolError = PolicyError::InvalidWorkerCount(0).into();
        assert_eq!(error.to_string(), "Worker count must be at least 1 (got 0)");
        assert!(matches!(error, PoolError::Policy(PolicyError::InvalidWorkerCount(0))));

        let error: PoolError = ContextError::NotAWorker.into();
        assert!(matches!(error, PoolError::Context(ContextError::NotAWorker)));

        assert_eq!(PoolError::AlreadyStarted.to_string(), "Pool has already been started");
        assert_eq!(PoolError::ShuttingDown.to_string(), "Pool is shutting down");
        assert!(PoolError::ShuttingDown.source().is_none());
    }

    #[test]
    fn test_pool_error_other_keeps_message() {
        let error = PoolError::Other(anyhow!("spawn failed"));
        assert!(error.to_string().contains("spawn failed"));
    }

    #[test]
    fn test_promise_error_display() {
        let task = Task::noop(TaskPolicy::Unbound);
        let id = task.id();
        assert_eq!(
            PromiseError::Canceled(id).to_string(),
            format!("Promise task #{} was canceled", id.as_u64())
        );
        assert_eq!(
            PromiseError::Failed(id).to_string(),
            format!("Promise task #{} failed while executing", id.as_u64())
        );
    }
}
