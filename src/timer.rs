//! One-shot timer running callbacks on a dedicated thread
//!
//! The callback re-arms the timer itself when it wants to run again, mirroring a kernel timer
//! that is `mod_timer`ed from its own handler.

use std::{
    io,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    thread::{self, JoinHandle, ThreadId},
};

use log::{error, warn};
use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::Clock;

pub(crate) struct Timer {
    handle: TimerHandle,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Timer {
    /// Construct a disarmed timer with no thread yet
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let shared = Arc::new(Shared {
            clock,
            state: Mutex::new(State {
                expires: None,
                firing: false,
                shutdown: false,
                thread: None,
            }),
            cond: Condvar::new(),
        });
        Self {
            handle: TimerHandle { shared },
            thread: Mutex::new(None),
        }
    }

    /// Start the thread that runs `callback` on every expiry
    pub fn spawn(&self, callback: impl FnMut() + Send + 'static) -> io::Result<()> {
        let mut thread = self.thread.lock();
        debug_assert!(thread.is_none(), "timer spawned twice");
        let shared = self.handle.shared.clone();
        let join = thread::Builder::new()
            .name("softpcm-timer".into())
            .spawn(move || run(shared, callback))?;
        self.handle.shared.state.lock().thread = Some(join.thread().id());
        *thread = Some(join);
        Ok(())
    }

    pub fn handle(&self) -> &TimerHandle {
        &self.handle
    }

    /// Disarm for good and wait for the thread to exit
    ///
    /// From within the callback itself the thread can't be joined; it exits once the callback
    /// returns instead.
    pub fn shutdown(&self) {
        {
            let mut state = self.handle.shared.state.lock();
            state.shutdown = true;
            state.expires = None;
            self.handle.shared.cond.notify_all();
        }
        let Some(join) = self.thread.lock().take() else {
            return;
        };
        if join.thread().id() == thread::current().id() {
            warn!("timer shut down from its own callback; not waiting for it");
            return;
        }
        if join.join().is_err() {
            error!("timer thread panicked");
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Arms and cancels a [`Timer`]; safe to use from the callback
#[derive(Clone)]
pub(crate) struct TimerHandle {
    shared: Arc<Shared>,
}

impl TimerHandle {
    /// Run the callback once the clock reaches `tick`, replacing any pending expiry
    pub fn arm_at(&self, tick: u64) {
        let mut state = self.shared.state.lock();
        if state.shutdown {
            return;
        }
        state.expires = Some(tick);
        self.shared.cond.notify_all();
    }

    /// Remove any pending expiry. Does not wait for a callback already running.
    pub fn cancel(&self) {
        self.shared.state.lock().expires = None;
    }

    /// Whether the timer has a pending expiry
    pub fn is_armed(&self) -> bool {
        self.shared.state.lock().expires.is_some()
    }

    /// Wait until no callback is running
    ///
    /// Returns `false` without waiting when called from the callback itself, which would
    /// otherwise wait on itself forever.
    pub fn sync(&self) -> bool {
        let mut state = self.shared.state.lock();
        if state.thread == Some(thread::current().id()) {
            return false;
        }
        while state.firing {
            self.shared.cond.wait(&mut state);
        }
        true
    }

    /// Make the timer thread re-check the clock against its expiry
    pub fn poll(&self) {
        let _state = self.shared.state.lock();
        self.shared.cond.notify_all();
    }
}

struct Shared {
    clock: Arc<dyn Clock>,
    state: Mutex<State>,
    /// Signalled on every change to `State`
    cond: Condvar,
}

struct State {
    /// Tick at which the callback is due
    expires: Option<u64>,
    /// Whether the callback is running
    firing: bool,
    shutdown: bool,
    thread: Option<ThreadId>,
}

fn run(shared: Arc<Shared>, mut callback: impl FnMut()) {
    let mut state = shared.state.lock();
    loop {
        if state.shutdown {
            break;
        }
        let Some(expires) = state.expires else {
            shared.cond.wait(&mut state);
            continue;
        };
        let now = shared.clock.now();
        if now < expires {
            match shared.clock.timeout(expires - now) {
                Some(timeout) => {
                    shared.cond.wait_for(&mut state, timeout);
                }
                None => shared.cond.wait(&mut state),
            }
            continue;
        }
        state.expires = None;
        state.firing = true;
        let result = MutexGuard::unlocked(&mut state, || {
            panic::catch_unwind(AssertUnwindSafe(&mut callback))
        });
        state.firing = false;
        shared.cond.notify_all();
        if result.is_err() {
            error!("timer callback panicked; timer disarmed");
            state.expires = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use super::*;
    use crate::{ManualClock, MonotonicClock};

    fn spawn(clock: Arc<dyn Clock>, callback: impl FnMut() + Send + 'static) -> Timer {
        let timer = Timer::new(clock);
        timer.spawn(callback).unwrap();
        timer
    }

    fn wait_until(mut f: impl FnMut() -> bool) {
        for _ in 0..1000 {
            if f() {
                return;
            }
            thread::sleep(Duration::from_millis(1));
        }
        panic!("condition not reached");
    }

    #[test]
    fn fires_once_per_arm() {
        let count = Arc::new(AtomicUsize::new(0));
        let clock = Arc::new(MonotonicClock::new());
        let timer = spawn(clock.clone(), {
            let count = count.clone();
            move || {
                count.fetch_add(1, Ordering::Relaxed);
            }
        });
        timer.handle().arm_at(clock.now() + 1_000_000);
        wait_until(|| count.load(Ordering::Relaxed) == 1);
        thread::sleep(Duration::from_millis(5));
        assert_eq!(count.load(Ordering::Relaxed), 1);
        assert!(!timer.handle().is_armed());
    }

    #[test]
    fn cancel_prevents_expiry() {
        let count = Arc::new(AtomicUsize::new(0));
        let clock = Arc::new(ManualClock::new(1000));
        let timer = spawn(clock.clone(), {
            let count = count.clone();
            move || {
                count.fetch_add(1, Ordering::Relaxed);
            }
        });
        timer.handle().arm_at(10);
        timer.handle().cancel();
        clock.advance(20);
        timer.handle().poll();
        thread::sleep(Duration::from_millis(5));
        assert_eq!(count.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn manual_clock_fires_on_poll() {
        let count = Arc::new(AtomicUsize::new(0));
        let clock = Arc::new(ManualClock::new(1000));
        let timer = spawn(clock.clone(), {
            let count = count.clone();
            move || {
                count.fetch_add(1, Ordering::Relaxed);
            }
        });
        timer.handle().arm_at(10);
        clock.advance(9);
        timer.handle().poll();
        thread::sleep(Duration::from_millis(5));
        assert_eq!(count.load(Ordering::Relaxed), 0);
        clock.advance(1);
        timer.handle().poll();
        wait_until(|| count.load(Ordering::Relaxed) == 1);
    }

    #[test]
    fn rearm_from_callback() {
        let count = Arc::new(AtomicUsize::new(0));
        let clock = Arc::new(MonotonicClock::new());
        let slot: Arc<Mutex<Option<TimerHandle>>> = Arc::new(Mutex::new(None));
        let timer = spawn(clock.clone(), {
            let count = count.clone();
            let slot = slot.clone();
            let clock = clock.clone();
            move || {
                if count.fetch_add(1, Ordering::Relaxed) < 4 {
                    if let Some(handle) = &*slot.lock() {
                        assert!(!handle.sync());
                        handle.arm_at(clock.now() + 100_000);
                    }
                }
            }
        });
        *slot.lock() = Some(timer.handle().clone());
        timer.handle().arm_at(clock.now());
        wait_until(|| count.load(Ordering::Relaxed) == 5);
        assert!(timer.handle().sync());
    }

    #[test]
    fn sync_waits_for_running_callback() {
        let clock = Arc::new(MonotonicClock::new());
        let entered = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(AtomicUsize::new(0));
        let timer = spawn(clock.clone(), {
            let entered = entered.clone();
            let done = done.clone();
            move || {
                entered.store(1, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(20));
                done.store(1, Ordering::SeqCst);
            }
        });
        timer.handle().arm_at(clock.now());
        wait_until(|| entered.load(Ordering::SeqCst) == 1);
        assert!(timer.handle().sync());
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn shutdown_joins() {
        let clock = Arc::new(MonotonicClock::new());
        let timer = spawn(clock, || {});
        timer.shutdown();
        timer.handle().arm_at(0);
        assert!(!timer.handle().is_armed());
        // Idempotent
        timer.shutdown();
    }
}
