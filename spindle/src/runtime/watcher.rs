use std::fmt;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Park/wake primitive shared by every worker of a pool.
///
/// Not a container: waiters supply their own readiness predicate, which is
/// evaluated under the watcher's mutex. Notifiers take the same mutex before
/// signalling, so a state change made before `notify_*` is never missed by a
/// waiter that evaluated the predicate as false.
pub struct QueueWatcher {
    mutex: Mutex<()>,
    cvar: Condvar,
}

impl QueueWatcher {
    pub fn new() -> Self {
        Self {
            mutex: Mutex::new(()),
            cvar: Condvar::new(),
        }
    }

    pub fn notify_one(&self) {
        let _guard = self.mutex.lock();
        self.cvar.notify_one();
    }

    pub fn notify_all(&self) {
        let _guard = self.mutex.lock();
        self.cvar.notify_all();
    }

    /// Blocks until `ready()` returns true. Spurious wakeups re-check the
    /// predicate.
    pub fn wait<F>(&self, mut ready: F)
    where
        F: FnMut() -> bool,
    {
        let mut guard = self.mutex.lock();
        while !ready() {
            self.cvar.wait(&mut guard);
        }
    }

    /// Like [`wait`](QueueWatcher::wait) with an upper bound. Returns the
    /// final value of the predicate.
    pub fn wait_for<F>(&self, mut ready: F, timeout: Duration) -> bool
    where
        F: FnMut() -> bool,
    {
        let deadline = Instant::now() + timeout;
        let mut guard = self.mutex.lock();
        while !ready() {
            if self.cvar.wait_until(&mut guard, deadline).timed_out() {
                return ready();
            }
        }
        true
    }
}

impl Default for QueueWatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for QueueWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueWatcher").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    #[test]
    fn ready_predicate_returns_immediately() {
        let watcher = QueueWatcher::new();
        watcher.wait(|| true);
        assert!(watcher.wait_for(|| true, Duration::from_millis(1)));
    }

    #[test]
    fn wait_for_gives_up() {
        let watcher = QueueWatcher::new();
        assert!(!watcher.wait_for(|| false, Duration::from_millis(10)));
    }

    #[test]
    fn notify_all_wakes_every_waiter() {
        let watcher = Arc::new(QueueWatcher::new());
        let flag = Arc::new(AtomicBool::new(false));

        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let watcher = watcher.clone();
                let flag = flag.clone();
                thread::spawn(move || watcher.wait(|| flag.load(Ordering::Acquire)))
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        flag.store(true, Ordering::Release);
        watcher.notify_all();

        for waiter in waiters {
            waiter.join().unwrap();
        }
    }

    #[test]
    fn notify_one_wakes_a_waiter() {
        let watcher = Arc::new(QueueWatcher::new());
        let flag = Arc::new(AtomicBool::new(false));

        let waiter = {
            let watcher = watcher.clone();
            let flag = flag.clone();
            thread::spawn(move || watcher.wait_for(|| flag.load(Ordering::Acquire), Duration::from_secs(5)))
        };

        flag.store(true, Ordering::Release);
        watcher.notify_one();
        assert!(waiter.join().unwrap());
    }
}
