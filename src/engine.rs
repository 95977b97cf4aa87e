use std::{
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use log::{debug, error, trace, warn};
use parking_lot::Mutex;

use crate::{
    notify::{Notifier, PeriodCallback},
    timer::{Timer, TimerHandle},
    Clock, Error, Feeder, Format, Hardware, MonotonicClock, Params, PeriodWaiter,
    PositionTracker, Result, SystemClock,
};

/// Begin building a virtual PCM engine
pub fn engine() -> Builder {
    Builder::default()
}

/// Configuration that engines are built from
#[must_use]
#[derive(Clone)]
pub struct Builder {
    backend: Backend,
    clock: Option<Arc<dyn Clock>>,
    hardware: Hardware,
    format: Format,
    channels: u32,
    source: Option<Arc<[u8]>>,
}

impl Builder {
    /// Scheduling strategy of the engine's timer
    pub fn backend(&mut self, backend: Backend) -> &mut Self {
        self.backend = backend;
        self
    }

    /// Source of time
    ///
    /// Defaults to a 1000 Hz [`SystemClock`] for [`Backend::System`] and a [`MonotonicClock`]
    /// for [`Backend::HighRes`].
    pub fn clock(&mut self, clock: Arc<dyn Clock>) -> &mut Self {
        self.clock = Some(clock);
        self
    }

    /// Limits on stream configuration
    pub fn hardware(&mut self, hardware: Hardware) -> &mut Self {
        self.hardware = hardware;
        self
    }

    /// Sample encoding of the ring buffer
    pub fn format(&mut self, format: Format) -> &mut Self {
        self.format = format;
        self
    }

    /// Samples per frame
    pub fn channels(&mut self, channels: u32) -> &mut Self {
        self.channels = channels;
        self
    }

    /// Audio copied into the ring buffer on every timer expiry, looping forever
    ///
    /// Without a source the ring buffer holds whatever the consumer leaves in it.
    pub fn source(&mut self, source: Arc<[u8]>) -> &mut Self {
        self.source = Some(source);
        self
    }

    /// Construct an idle engine with a disarmed timer
    pub fn build(&self) -> Result<Engine> {
        self.hardware.check_layout(self.format, self.channels)?;
        if self.source.as_ref().map_or(false, |s| s.is_empty()) {
            return Err(Error::EmptySource);
        }
        let clock: Arc<dyn Clock> = match (&self.clock, self.backend) {
            (Some(clock), _) => clock.clone(),
            (None, Backend::System) => Arc::new(SystemClock::default()),
            (None, Backend::HighRes) => Arc::new(MonotonicClock::new()),
        };
        let timer = Timer::new(clock.clone());
        let shared = Arc::new(Shared {
            running: AtomicBool::new(false),
            backend: self.backend,
            clock,
            timer: timer.handle().clone(),
            notifier: Arc::new(Notifier::new()),
            inner: Mutex::new(Inner {
                state: State::Idle,
                params: None,
                tracker: PositionTracker::new(),
                feeder: self.source.clone().map(Feeder::new),
                buffer: Box::default(),
                period_ticks: 0,
                next_expiry: 0,
            }),
        });
        let weak = Arc::downgrade(&shared);
        timer
            .spawn(move || {
                if let Some(shared) = weak.upgrade() {
                    shared.on_timer();
                }
            })
            .map_err(Error::Timer)?;
        debug!("created {:?} engine", self.backend);
        Ok(Engine {
            shared,
            timer,
            hardware: self.hardware.clone(),
            frame_bytes: self.format.bytes_per_sample() * self.channels as usize,
        })
    }
}

impl Default for Builder {
    fn default() -> Self {
        Builder {
            backend: Backend::System,
            clock: None,
            hardware: Hardware::default(),
            format: Format::U8,
            channels: 2,
            source: None,
        }
    }
}

/// Timer scheduling strategy, fixed for the life of an engine
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Backend {
    /// Low-resolution timer re-armed for the time remaining until the next period boundary
    System,
    /// High-resolution timer forwarded by whole periods from its previous expiry
    HighRes,
}

/// Lifecycle stage of an [`Engine`]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum State {
    /// Created, never prepared
    Idle,
    /// Configured and rewound, timer disarmed
    Prepared,
    /// Timer running
    Running,
    /// Timer disarmed after running; position frozen
    Stopped,
    /// Timer torn down; no further use possible
    Freed,
}

/// Stream control commands, as issued by a PCM framework
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Trigger {
    /// Begin playback
    Start,
    /// Continue playback after a suspend
    Resume,
    /// End playback
    Stop,
    /// Pause playback for a system suspend
    Suspend,
}

/// Virtual PCM playback engine driven by a software timer
///
/// Emulates the position and period interrupts of DMA hardware: while running, a timer advances
/// the playback position according to elapsed time, rewrites the ring buffer from the configured
/// source, and notifies consumers whenever a period boundary passes.
///
/// Operations must be sequenced as prepare → start → stop (→ start → stop …), as a PCM framework
/// does. Out-of-order calls are rejected with [`Error::InvalidState`].
pub struct Engine {
    shared: Arc<Shared>,
    timer: Timer,
    hardware: Hardware,
    frame_bytes: usize,
}

impl Engine {
    /// Configure for `params` and rewind to the start of the buffer
    ///
    /// Allocates a fresh ring buffer. On error the engine is left as it was.
    pub fn prepare(&self, params: Params) -> Result<()> {
        self.hardware.check_params(&params, self.frame_bytes)?;
        self.shared.check_state("prepare", &[State::Idle, State::Prepared, State::Stopped])?;

        let mut tracker = PositionTracker::new();
        tracker.reset(
            params.rate,
            params.buffer_size,
            params.period_size,
            self.shared.clock.ticks_per_second(),
        )?;
        let buffer = alloc_buffer(params.buffer_size * self.frame_bytes)?;
        let period_ticks = period_ticks(&params, self.shared.clock.ticks_per_second());

        let old = {
            let mut inner = self.shared.inner.lock();
            if !matches!(inner.state, State::Idle | State::Prepared | State::Stopped) {
                return Err(Error::InvalidState {
                    op: "prepare",
                    state: inner.state,
                });
            }
            inner.state = State::Prepared;
            inner.params = Some(params);
            inner.tracker = tracker;
            inner.period_ticks = period_ticks;
            std::mem::replace(&mut inner.buffer, buffer)
        };
        drop(old);
        debug!(
            "prepared: {} Hz, {} frame buffer, {} frame period, {} byte frames",
            params.rate, params.buffer_size, params.period_size, self.frame_bytes
        );
        Ok(())
    }

    /// Start, or resume after [`stop`](Self::stop), the timer
    ///
    /// The source is replayed from its beginning on every start; the position carries on from
    /// where it stopped.
    pub fn start(&self) -> Result<()> {
        let mut inner = self.shared.inner.lock();
        if !matches!(inner.state, State::Prepared | State::Stopped) {
            return Err(Error::InvalidState {
                op: "start",
                state: inner.state,
            });
        }
        let now = self.shared.clock.now();
        inner.tracker.set_base(now);
        if let Some(feeder) = &mut inner.feeder {
            feeder.rewind();
        }
        let expires = match self.shared.backend {
            Backend::System => now + inner.tracker.next_rearm_delay(),
            Backend::HighRes => {
                inner.next_expiry = now + inner.period_ticks;
                inner.next_expiry
            }
        };
        self.shared.running.store(true, Ordering::Release);
        self.shared.timer.arm_at(expires);
        inner.state = State::Running;
        debug!("started at tick {}", now);
        Ok(())
    }

    /// Stop the timer, freezing the position
    ///
    /// Once this returns the period callback is not running and won't run again until the next
    /// [`start`](Self::start). Called from within a period-elapsed callback, the callback in
    /// progress can't be waited for and runs to completion after this returns.
    pub fn stop(&self) -> Result<()> {
        self.shared.halt()?;
        if !self.shared.timer.sync() {
            warn!("stopped from the period callback; not waiting for it");
        }
        debug!("stopped");
        Ok(())
    }

    /// Dispatch a framework trigger command to [`start`](Self::start) or [`stop`](Self::stop)
    pub fn trigger(&self, cmd: Trigger) -> Result<()> {
        match cmd {
            Trigger::Start | Trigger::Resume => self.start(),
            Trigger::Stop | Trigger::Suspend => self.stop(),
        }
    }

    /// Current playback position in frames, in `0..buffer_size`
    ///
    /// Only advances while running. Returns 0 if the engine was never prepared.
    pub fn pointer(&self) -> usize {
        let mut inner = self.shared.inner.lock();
        if !inner.tracker.is_configured() {
            warn!("pointer read before prepare");
            return 0;
        }
        if inner.state == State::Running {
            let now = self.shared.clock.now();
            inner.tracker.advance(now);
        }
        let pos = inner.tracker.position_frames();
        trace!("pointer {}", pos);
        pos
    }

    /// Tear down the timer, waiting for any callback in progress
    ///
    /// Afterwards every operation fails. Also performed on drop. Must not be called from a
    /// period-elapsed callback of this engine.
    pub fn free(&self) {
        self.shared.running.store(false, Ordering::Release);
        {
            let mut inner = self.shared.inner.lock();
            if inner.state == State::Freed {
                return;
            }
            self.shared.timer.cancel();
            inner.state = State::Freed;
        }
        self.timer.shutdown();
        debug!("freed");
    }

    /// Call `f` with the number of newly completed periods whenever at least one period elapses
    ///
    /// Replaces any previously registered callback. `f` runs on the engine's timer thread without
    /// any engine lock held; it may query this engine, and may call [`stop`](Self::stop). If `f`
    /// panics, the engine stops as though [`stop`](Self::stop) had been called and stays in
    /// [`State::Stopped`] until started again.
    pub fn on_period_elapsed(&self, f: impl Fn(u64) + Send + Sync + 'static) {
        self.shared.notifier.set_callback(Some(Arc::new(f) as PeriodCallback));
    }

    /// Remove the callback registered with [`on_period_elapsed`](Self::on_period_elapsed)
    pub fn clear_period_callback(&self) {
        self.shared.notifier.set_callback(None);
    }

    /// Construct a handle for blocking until periods elapse
    pub fn waiter(&self) -> PeriodWaiter {
        PeriodWaiter::new(self.shared.notifier.clone())
    }

    /// Copy ring buffer contents starting at `frame` into `dst`, wrapping at the end of the
    /// buffer
    ///
    /// Copies at most one buffer's worth. Returns the number of bytes copied.
    pub fn copy_out(&self, frame: usize, dst: &mut [u8]) -> usize {
        let inner = self.shared.inner.lock();
        let buffer = &inner.buffer[..];
        if buffer.is_empty() {
            return 0;
        }
        let n = dst.len().min(buffer.len());
        let frames = buffer.len() / self.frame_bytes;
        let start = (frame % frames) * self.frame_bytes;
        let first = n.min(buffer.len() - start);
        dst[..first].copy_from_slice(&buffer[start..start + first]);
        dst[first..n].copy_from_slice(&buffer[..n - first]);
        n
    }

    /// Make the timer re-check its clock
    ///
    /// Needed after moving a [`ManualClock`](crate::ManualClock), whose timeouts never expire by
    /// themselves; harmless otherwise.
    pub fn poll_timer(&self) {
        self.shared.timer.poll();
    }

    /// Current lifecycle stage
    pub fn state(&self) -> State {
        self.shared.inner.lock().state
    }

    /// Whether the timer is running
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Configuration from the last successful [`prepare`](Self::prepare)
    pub fn params(&self) -> Option<Params> {
        self.shared.inner.lock().params
    }

    /// Scheduling strategy
    pub fn backend(&self) -> Backend {
        self.shared.backend
    }

    /// Bytes per frame in the ring buffer
    pub fn frame_bytes(&self) -> usize {
        self.frame_bytes
    }

    /// Limits this engine accepts
    pub fn hardware(&self) -> &Hardware {
        &self.hardware
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.free();
    }
}

/// State reachable from the timer callback
struct Shared {
    /// Cleared before the lock is taken to stop, so an in-flight callback bails out early
    running: AtomicBool,
    backend: Backend,
    clock: Arc<dyn Clock>,
    timer: TimerHandle,
    notifier: Arc<Notifier>,
    inner: Mutex<Inner>,
}

impl Shared {
    fn check_state(&self, op: &'static str, allowed: &[State]) -> Result<()> {
        let state = self.inner.lock().state;
        if allowed.contains(&state) {
            Ok(())
        } else {
            Err(Error::InvalidState { op, state })
        }
    }

    /// Disarm and freeze the position at the current tick
    fn halt(&self) -> Result<()> {
        self.running.store(false, Ordering::Release);
        let mut inner = self.inner.lock();
        if inner.state != State::Running {
            return Err(Error::InvalidState {
                op: "stop",
                state: inner.state,
            });
        }
        self.timer.cancel();
        let now = self.clock.now();
        inner.tracker.advance(now);
        inner.state = State::Stopped;
        Ok(())
    }

    /// Timer expiry: account for elapsed time, re-arm, refill the buffer, and notify
    fn on_timer(&self) {
        if !self.running.load(Ordering::Acquire) {
            return;
        }
        let (elapsed, pos) = {
            let mut inner = self.inner.lock();
            if !self.running.load(Ordering::Acquire) || inner.state != State::Running {
                return;
            }
            let now = self.clock.now();
            inner.tracker.advance(now);
            let expires = match self.backend {
                Backend::System => now + inner.tracker.next_rearm_delay(),
                Backend::HighRes => {
                    let period = inner.period_ticks;
                    forward(&mut inner.next_expiry, now, period)
                }
            };
            self.timer.arm_at(expires);
            let elapsed = inner.tracker.take_elapsed();
            let Inner { feeder, buffer, .. } = &mut *inner;
            if let Some(feeder) = feeder {
                feeder.feed(buffer);
            }
            (elapsed, inner.tracker.position_frames())
        };
        trace!("timer: {} periods elapsed, position {}", elapsed, pos);
        if elapsed > 0 {
            let result = panic::catch_unwind(AssertUnwindSafe(|| self.notifier.notify(elapsed)));
            if result.is_err() {
                error!("period callback panicked; stopping");
                // Already stopped by the callback itself if this fails
                let _ = self.halt();
            }
        }
    }
}

/// State guarded by the engine lock
struct Inner {
    state: State,
    params: Option<Params>,
    tracker: PositionTracker,
    feeder: Option<Feeder>,
    /// Ring buffer, `buffer_size * frame_bytes` long
    buffer: Box<[u8]>,
    /// Period length in ticks, rounded up
    period_ticks: u64,
    /// Tick of the next high-resolution expiry
    next_expiry: u64,
}

fn alloc_buffer(len: usize) -> Result<Box<[u8]>> {
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(len)
        .map_err(|_| Error::OutOfMemory)?;
    buffer.resize(len, 0);
    Ok(buffer.into_boxed_slice())
}

/// Duration of one period in ticks, rounded up so expiries never precede the period boundary
fn period_ticks(params: &Params, ticks_per_second: u64) -> u64 {
    let rate = u128::from(params.rate);
    let ticks = (params.period_size as u128 * u128::from(ticks_per_second) + rate - 1) / rate;
    ticks.clamp(1, u128::from(u64::MAX)) as u64
}

/// Move `expiry` forward by whole periods until it lies after `now`
fn forward(expiry: &mut u64, now: u64, period: u64) -> u64 {
    if *expiry <= now {
        let missed = (now - *expiry) / period + 1;
        *expiry += missed * period;
    }
    *expiry
}
