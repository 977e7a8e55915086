//! Multicast callbacks.
//!
//! [`Event`] calls its subscribers on the invoking thread, in subscription
//! order. [`AsyncEvent`] turns each subscriber call into an `Unbound` task
//! on a scheduler.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::trace;

use spindle_api::{PoolError, Scheduler, Task, TaskHandle, TaskPolicy};

/// Returned by `subscribe`; pass it to `unsubscribe` to remove the callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler<T> = Arc<dyn Fn(T) + Send + Sync>;

/// A thread-safe list of callbacks taking a `T`.
pub struct Event<T> {
    handlers: Mutex<Vec<(SubscriptionId, Handler<T>)>>,
    next_id: AtomicU64,
}

impl<T: Clone> Event<T> {
    pub fn new() -> Self {
        Self {
            handlers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers.lock().push((id, Arc::new(handler)));
        id
    }

    /// Returns `false` if `id` was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.lock();
        let before = handlers.len();
        handlers.retain(|(existing, _)| *existing != id);
        handlers.len() != before
    }

    pub fn len(&self) -> usize {
        self.handlers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.lock().is_empty()
    }

    pub fn clear(&self) {
        self.handlers.lock().clear();
    }

    /// Calls every subscriber with a clone of `value`. Handlers run outside
    /// the lock, so they may subscribe or unsubscribe; such changes apply
    /// from the next invocation.
    pub fn invoke(&self, value: T) {
        for handler in self.snapshot() {
            handler(value.clone());
        }
    }

    fn snapshot(&self) -> Vec<Handler<T>> {
        self.handlers
            .lock()
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect()
    }
}

impl<T: Clone> Default for Event<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Event<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("subscribers", &self.handlers.lock().len())
            .finish()
    }
}

/// An [`Event`] whose invocation runs every subscriber as its own task.
pub struct AsyncEvent<T> {
    event: Event<T>,
    scheduler: Weak<dyn Scheduler>,
}

impl<T> AsyncEvent<T>
where
    T: Clone + Send + 'static,
{
    /// The event holds the scheduler weakly; invoking it after the
    /// scheduler is gone fails with `PoolError::ShuttingDown`.
    pub fn new<S>(scheduler: &Arc<S>) -> Self
    where
        S: Scheduler + 'static,
    {
        let weak: Weak<S> = Arc::downgrade(scheduler);
        Self {
            event: Event::new(),
            scheduler: weak,
        }
    }

    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        self.event.subscribe(handler)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.event.unsubscribe(id)
    }

    pub fn len(&self) -> usize {
        self.event.len()
    }

    pub fn is_empty(&self) -> bool {
        self.event.is_empty()
    }

    pub fn clear(&self) {
        self.event.clear();
    }

    /// Submits one `Unbound` task per subscriber and returns their handles.
    /// Stops at the first rejected submission; tasks already submitted
    /// still run.
    pub fn invoke(&self, value: T) -> Result<Vec<TaskHandle>, PoolError> {
        let handlers = self.event.snapshot();
        if handlers.is_empty() {
            return Ok(Vec::new());
        }

        let scheduler = self.scheduler.upgrade().ok_or(PoolError::ShuttingDown)?;
        trace!(subscribers = handlers.len(), "dispatching async event");

        handlers
            .into_iter()
            .map(|handler| {
                let value = value.clone();
                scheduler.add_task(Task::once(move || handler(value), TaskPolicy::Unbound))
            })
            .collect()
    }

    /// Calls every subscriber on the current thread, like [`Event::invoke`].
    pub fn invoke_sync(&self, value: T) {
        self.event.invoke(value);
    }
}

impl<T> fmt::Debug for AsyncEvent<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncEvent")
            .field("subscribers", &self.event.handlers.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn invoke_calls_subscribers_in_order() {
        let event = Event::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["a", "b", "c"] {
            let seen = seen.clone();
            event.subscribe(move |value: u32| seen.lock().push(format!("{tag}{value}")));
        }

        event.invoke(7);
        assert_eq!(*seen.lock(), vec!["a7", "b7", "c7"]);
    }

    #[test]
    fn unsubscribe_removes_only_that_handler() {
        let event = Event::new();
        let count = Arc::new(AtomicUsize::new(0));

        let first = {
            let count = count.clone();
            event.subscribe(move |_: ()| {
                count.fetch_add(1, Ordering::SeqCst);
            })
        };
        {
            let count = count.clone();
            event.subscribe(move |_: ()| {
                count.fetch_add(10, Ordering::SeqCst);
            });
        }

        assert!(event.unsubscribe(first));
        assert!(!event.unsubscribe(first));
        assert_eq!(event.len(), 1);

        event.invoke(());
        assert_eq!(count.load(Ordering::SeqCst), 10);

        event.clear();
        assert!(event.is_empty());
    }

    #[test]
    fn handlers_may_subscribe_during_invoke() {
        let event = Arc::new(Event::new());
        let inner = event.clone();
        event.subscribe(move |_: ()| {
            inner.subscribe(|_: ()| {});
        });

        event.invoke(());
        assert_eq!(event.len(), 2);
    }
}
