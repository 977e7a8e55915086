use std::sync::{Arc, Weak};
use std::time::Duration;

use spindle::logging;
use spindle::{
    PolicyError, PoolError, Promise, PromiseError, Task, TaskPolicy, TaskState, ThreadPool,
};

const TIMEOUT: Duration = Duration::from_secs(10);

#[cfg(test)]
mod tests {
    use super::*;

    fn started_pool(workers: usize) -> Arc<ThreadPool> {
        logging::init_test();
        let pool = ThreadPool::with_workers(workers).unwrap();
        pool.start().unwrap();
        pool
    }

    #[test]
    fn test_result_returns_value() -> anyhow::Result<()> {
        let pool = started_pool(2);
        let promise = Promise::spawn(&pool, || (1..=10).sum::<u64>())?;
        assert_eq!(promise.result()?, 55);
        assert!(promise.is_ready());
        assert_eq!(promise.handle().state(), TaskState::Finished);
        assert!(!promise.cancel());
        pool.stop();
        Ok(())
    }

    #[test]
    fn test_then_registered_before_completion() -> anyhow::Result<()> {
        let pool = started_pool(2);
        let (gate_tx, gate_rx) = flume::bounded::<()>(1);
        let (tx, rx) = flume::unbounded();

        let promise = Promise::spawn(&pool, move || {
            let _ = gate_rx.recv_timeout(TIMEOUT);
            String::from("slow result")
        })?;

        assert!(promise.then(move |value| tx.send(value).unwrap())?.is_none());
        assert!(!promise.is_ready());
        assert_eq!(promise.try_get(), None);

        gate_tx.send(())?;
        assert_eq!(rx.recv_timeout(TIMEOUT)?, "slow result");
        assert_eq!(promise.try_get().as_deref(), Some("slow result"));
        pool.stop();
        Ok(())
    }

    #[test]
    fn test_then_registered_after_completion_is_submitted_immediately() -> anyhow::Result<()> {
        let pool = started_pool(2);
        let (tx, rx) = flume::unbounded();

        let promise = Promise::spawn(&pool, || 21 * 2)?;
        assert_eq!(promise.result()?, 42);

        let handle = promise.then(move |value| tx.send(value).unwrap())?;
        let handle = handle.expect("value was ready, continuation must be submitted");
        assert_eq!(handle.wait_for(TIMEOUT), TaskState::Finished);
        assert_eq!(rx.recv_timeout(TIMEOUT)?, 42);
        pool.stop();
        Ok(())
    }

    #[test]
    fn test_last_continuation_wins() -> anyhow::Result<()> {
        let pool = started_pool(1);
        let (gate_tx, gate_rx) = flume::bounded::<()>(1);
        let (tx, rx) = flume::unbounded();

        let promise = Promise::spawn(&pool, move || {
            let _ = gate_rx.recv_timeout(TIMEOUT);
            7
        })?;

        let first = tx.clone();
        promise.then(move |value| first.send(("first", value)).unwrap())?;
        promise.then(move |value| tx.send(("second", value)).unwrap())?;

        gate_tx.send(())?;
        assert_eq!(rx.recv_timeout(TIMEOUT)?, ("second", 7));
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        pool.stop();
        Ok(())
    }

    #[test]
    fn test_builder_places_task_and_continuation() -> anyhow::Result<()> {
        let pool = started_pool(2);
        let (tx, rx) = flume::unbounded();

        let worker_of = |weak: Weak<ThreadPool>| {
            weak.upgrade()
                .and_then(|pool| pool.this_looper().ok())
                .map(|looper| looper.index())
        };

        let weak = Arc::downgrade(&pool);
        let promise = Promise::<Option<usize>>::builder()
            .task_policy(TaskPolicy::Bound(1))
            .continuation_policy(TaskPolicy::Bound(0))
            .spawn(&pool, move || worker_of(weak))?;

        let weak = Arc::downgrade(&pool);
        promise.then(move |producer| tx.send((producer, worker_of(weak))).unwrap())?;

        assert_eq!(rx.recv_timeout(TIMEOUT)?, (Some(1), Some(0)));
        pool.stop();
        Ok(())
    }

    #[test]
    fn test_invalid_continuation_policy_is_rejected() {
        let pool = ThreadPool::with_workers(2).unwrap();
        let result = Promise::<i32>::builder()
            .continuation_policy(TaskPolicy::Bound(5))
            .spawn(&pool, || 1);

        assert!(matches!(
            result,
            Err(PoolError::Policy(PolicyError::WorkerOutOfRange { index: 5, worker_count: 2 }))
        ));
        assert_eq!(pool.metrics().global_queue_len, 0);
    }

    #[test]
    fn test_canceled_promise_reports_cancellation() -> anyhow::Result<()> {
        let pool = ThreadPool::with_workers(1)?;
        let promise = Promise::spawn(&pool, || 1)?;

        assert!(promise.cancel());
        assert_eq!(promise.result(), Err(PromiseError::Canceled(promise.id())));
        assert_eq!(promise.try_get(), None);
        assert!(!promise.is_ready());
        Ok(())
    }

    #[test]
    fn test_cancel_while_executing_drops_continuation() -> anyhow::Result<()> {
        let pool = started_pool(1);
        let (running_tx, running_rx) = flume::bounded::<()>(1);
        let (gate_tx, gate_rx) = flume::bounded::<()>(1);
        let (tx, rx) = flume::unbounded();

        let promise = Promise::spawn(&pool, move || {
            running_tx.send(()).unwrap();
            let _ = gate_rx.recv_timeout(TIMEOUT);
            5
        })?;
        promise.then(move |value| tx.send(value).unwrap())?;

        running_rx.recv_timeout(TIMEOUT)?;
        assert!(promise.cancel());
        gate_tx.send(())?;

        // One worker: once this runs, the promise task has returned.
        let sentinel = pool.add_task(Task::noop(TaskPolicy::Unbound))?;
        assert_eq!(sentinel.wait_for(TIMEOUT), TaskState::Finished);

        assert_eq!(promise.result(), Err(PromiseError::Canceled(promise.id())));
        assert_eq!(promise.try_get(), None);
        assert!(!promise.is_ready());
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        pool.stop();
        Ok(())
    }

    #[test]
    fn test_panicking_promise_reports_failure() -> anyhow::Result<()> {
        let pool = started_pool(1);
        let promise: Promise<u32> = Promise::spawn(&pool, || panic!("no value today"))?;

        assert_eq!(promise.result(), Err(PromiseError::Failed(promise.id())));
        assert!(!promise.is_ready());

        // The worker keeps serving promises.
        let next = Promise::spawn(&pool, || 3)?;
        assert_eq!(next.result()?, 3);
        pool.stop();
        Ok(())
    }

    #[test]
    fn test_unit_promise() -> anyhow::Result<()> {
        let pool = started_pool(1);
        let (tx, rx) = flume::unbounded();

        let promise = Promise::spawn(&pool, move || tx.send("side effect").unwrap())?;
        promise.result()?;
        assert_eq!(rx.recv_timeout(TIMEOUT)?, "side effect");
        pool.stop();
        Ok(())
    }

    #[test]
    fn test_cloned_promise_shares_result() -> anyhow::Result<()> {
        let pool = started_pool(2);
        let promise = Promise::spawn(&pool, || vec![1, 2, 3])?;
        let copy = promise.clone();

        let waiter = std::thread::spawn(move || copy.result());
        assert_eq!(promise.result()?, vec![1, 2, 3]);
        assert_eq!(waiter.join().unwrap()?, vec![1, 2, 3]);
        pool.stop();
        Ok(())
    }
}
