//! Tick sources driving engines

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

/// Monotonic source of ticks in some fixed unit
///
/// The tick unit is whatever the scheduler natively works in: jiffies for [`SystemClock`],
/// nanoseconds for [`MonotonicClock`].
pub trait Clock: Send + Sync + 'static {
    /// Number of ticks in one second; never zero
    fn ticks_per_second(&self) -> u64;

    /// Current tick. Must never decrease.
    fn now(&self) -> u64;

    /// Real time to wait for `ticks` ticks to pass, or `None` if the clock doesn't advance on its
    /// own
    fn timeout(&self, ticks: u64) -> Option<Duration> {
        let tps = u128::from(self.ticks_per_second());
        let nanos = (u128::from(ticks) * 1_000_000_000 + tps - 1) / tps;
        Some(Duration::from_nanos(nanos.min(u128::from(u64::MAX)) as u64))
    }
}

/// Low-resolution tick counter in the manner of kernel jiffies
#[derive(Debug, Clone)]
pub struct SystemClock {
    hz: u32,
    epoch: Instant,
}

impl SystemClock {
    /// Count `hz` ticks per second, starting from zero now
    pub fn new(hz: u32) -> Self {
        assert!(hz > 0, "clock must tick");
        Self {
            hz,
            epoch: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new(DEFAULT_HZ)
    }
}

/// Tick rate of [`SystemClock::default`]
pub const DEFAULT_HZ: u32 = 1000;

impl Clock for SystemClock {
    fn ticks_per_second(&self) -> u64 {
        self.hz.into()
    }

    fn now(&self) -> u64 {
        let nanos = self.epoch.elapsed().as_nanos();
        (nanos * u128::from(self.hz) / 1_000_000_000) as u64
    }
}

/// Nanosecond-resolution monotonic clock
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    epoch: Instant,
}

impl MonotonicClock {
    /// Count nanoseconds, starting from zero now
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn ticks_per_second(&self) -> u64 {
        1_000_000_000
    }

    fn now(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }
}

/// Clock that only moves when told to
///
/// Useful for driving engines deterministically in simulations and tests. Timers waiting on a
/// manual clock never expire by themselves; after moving the clock, call
/// [`Engine::poll_timer`](crate::Engine::poll_timer) to let them catch up.
#[derive(Debug)]
pub struct ManualClock {
    ticks_per_second: u64,
    now: AtomicU64,
}

impl ManualClock {
    /// Start at tick zero
    pub fn new(ticks_per_second: u64) -> Self {
        assert!(ticks_per_second > 0, "clock must tick");
        Self {
            ticks_per_second,
            now: AtomicU64::new(0),
        }
    }

    /// Move forward by `ticks`
    pub fn advance(&self, ticks: u64) {
        self.now.fetch_add(ticks, Ordering::AcqRel);
    }

    /// Move forward to `tick`. Earlier ticks are ignored.
    pub fn set(&self, tick: u64) {
        self.now.fetch_max(tick, Ordering::AcqRel);
    }
}

impl Clock for ManualClock {
    fn ticks_per_second(&self) -> u64 {
        self.ticks_per_second
    }

    fn now(&self) -> u64 {
        self.now.load(Ordering::Acquire)
    }

    fn timeout(&self, _: u64) -> Option<Duration> {
        None
    }
}
