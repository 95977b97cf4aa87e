//! Period-elapsed delivery to consumers

use std::{sync::Arc, time::Duration};

use parking_lot::{Condvar, Mutex};

/// Callback invoked with the number of periods completed since the last invocation
pub type PeriodCallback = Arc<dyn Fn(u64) + Send + Sync>;

/// Wakes consumers when periods elapse
///
/// Never called with an engine's lock held, so consumers are free to query the engine from
/// their callbacks.
pub(crate) struct Notifier {
    callback: Mutex<Option<PeriodCallback>>,
    edges: Mutex<Edges>,
    cond: Condvar,
}

#[derive(Default, Copy, Clone)]
struct Edges {
    /// Number of notifications delivered
    count: u64,
    /// Total periods reported
    periods: u64,
}

impl Notifier {
    pub fn new() -> Self {
        Self {
            callback: Mutex::new(None),
            edges: Mutex::new(Edges::default()),
            cond: Condvar::new(),
        }
    }

    pub fn set_callback(&self, callback: Option<PeriodCallback>) {
        *self.callback.lock() = callback;
    }

    /// Deliver one edge covering `periods` completed periods
    pub fn notify(&self, periods: u64) {
        {
            let mut edges = self.edges.lock();
            edges.count += 1;
            edges.periods += periods;
            self.cond.notify_all();
        }
        let callback = self.callback.lock().clone();
        if let Some(callback) = callback {
            callback(periods);
        }
    }

    fn edges(&self) -> Edges {
        *self.edges.lock()
    }
}

/// Blocks a consumer until the engine reports progress
///
/// Edge-triggered: each wait returns once at least one notification has arrived since the
/// previous wait returned, however many were delivered in between.
pub struct PeriodWaiter {
    notifier: Arc<Notifier>,
    seen: u64,
}

impl PeriodWaiter {
    pub(crate) fn new(notifier: Arc<Notifier>) -> Self {
        let seen = notifier.edges().count;
        Self { notifier, seen }
    }

    /// Block until a period elapses
    pub fn wait(&mut self) {
        let mut edges = self.notifier.edges.lock();
        while edges.count == self.seen {
            self.notifier.cond.wait(&mut edges);
        }
        self.seen = edges.count;
    }

    /// Block until a period elapses or `timeout` passes. Returns whether a period elapsed.
    pub fn wait_timeout(&mut self, timeout: Duration) -> bool {
        let mut edges = self.notifier.edges.lock();
        if edges.count == self.seen {
            self.notifier.cond.wait_while_for(
                &mut edges,
                |edges| edges.count == self.seen,
                timeout,
            );
        }
        if edges.count == self.seen {
            return false;
        }
        self.seen = edges.count;
        true
    }

    /// Whether a period elapsed since the last successful wait, without blocking
    pub fn try_wait(&mut self) -> bool {
        let count = self.notifier.edges().count;
        if count == self.seen {
            return false;
        }
        self.seen = count;
        true
    }

    /// Total periods reported to this engine's consumers so far
    pub fn periods(&self) -> u64 {
        self.notifier.edges().periods
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicU64, Ordering},
        thread,
    };

    use super::*;

    #[test]
    fn callback_receives_counts() {
        let notifier = Notifier::new();
        let total = Arc::new(AtomicU64::new(0));
        notifier.set_callback(Some(Arc::new({
            let total = total.clone();
            move |n| {
                total.fetch_add(n, Ordering::Relaxed);
            }
        })));
        notifier.notify(1);
        notifier.notify(3);
        assert_eq!(total.load(Ordering::Relaxed), 4);
        notifier.set_callback(None);
        notifier.notify(2);
        assert_eq!(total.load(Ordering::Relaxed), 4);
    }

    #[test]
    fn waiter_is_edge_triggered() {
        let notifier = Arc::new(Notifier::new());
        notifier.notify(1);
        let mut waiter = PeriodWaiter::new(notifier.clone());
        assert!(!waiter.try_wait());
        notifier.notify(1);
        notifier.notify(2);
        assert!(waiter.try_wait());
        assert!(!waiter.try_wait());
        assert_eq!(waiter.periods(), 4);
        assert!(!waiter.wait_timeout(Duration::from_millis(1)));
    }

    #[test]
    fn wait_wakes_on_notify() {
        let notifier = Arc::new(Notifier::new());
        let mut waiter = PeriodWaiter::new(notifier.clone());
        let t = thread::spawn({
            let notifier = notifier.clone();
            move || {
                thread::sleep(Duration::from_millis(10));
                notifier.notify(1);
            }
        });
        waiter.wait();
        t.join().unwrap();
        assert_eq!(waiter.periods(), 1);
    }

    #[test]
    fn callback_may_reenter_notifier() {
        let notifier = Arc::new(Notifier::new());
        let inner = Arc::downgrade(&notifier);
        notifier.set_callback(Some(Arc::new(move |_| {
            if let Some(notifier) = inner.upgrade() {
                // Replacing the callback from inside it must not deadlock
                notifier.set_callback(None);
            }
        })));
        notifier.notify(1);
        notifier.notify(1);
        let waiter = PeriodWaiter::new(notifier);
        assert_eq!(waiter.periods(), 2);
    }
}
