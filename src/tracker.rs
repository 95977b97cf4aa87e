//! Tick-to-frame position accounting

use crate::{Error, Result};

/// Converts clock ticks into a buffer position and a count of elapsed periods
///
/// Positions are kept in units of frames × ticks-per-second, so that converting ticks to frames
/// never truncates regardless of how the sample rate relates to the tick rate. Integer only; late
/// or irregular calls to [`advance`](Self::advance) are accounted for exactly.
#[derive(Debug, Clone, Default)]
pub struct PositionTracker {
    rate: u64,
    ticks_per_second: u64,
    /// Tick of the last update
    base: u64,
    /// Fractional position in the buffer, `< frac_buffer_size`
    frac_pos: u128,
    /// Fractional budget left until the next period boundary, in `1..=frac_period_size`
    frac_period_rest: u128,
    /// `buffer_size * ticks_per_second`
    frac_buffer_size: u128,
    /// `period_size * ticks_per_second`
    frac_period_size: u128,
    elapsed: u64,
}

impl PositionTracker {
    /// Construct a tracker with no configuration
    ///
    /// [`reset`](Self::reset) must be called before any other use.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rewind to the start of a `buffer_size`-frame buffer divided into `period_size`-frame
    /// periods, played at `rate` frames per second against a clock of `ticks_per_second`
    ///
    /// On error the tracker is left unchanged.
    pub fn reset(
        &mut self,
        rate: u32,
        buffer_size: usize,
        period_size: usize,
        ticks_per_second: u64,
    ) -> Result<()> {
        if rate == 0 {
            return Err(Error::ZeroRate);
        }
        if buffer_size == 0 {
            return Err(Error::ZeroBuffer);
        }
        if period_size == 0 {
            return Err(Error::ZeroPeriod);
        }
        if period_size > buffer_size {
            return Err(Error::PeriodExceedsBuffer {
                period: period_size,
                buffer: buffer_size,
            });
        }
        assert!(ticks_per_second > 0, "clock must tick");
        self.rate = rate.into();
        self.ticks_per_second = ticks_per_second;
        self.frac_pos = 0;
        self.frac_buffer_size = buffer_size as u128 * u128::from(ticks_per_second);
        self.frac_period_size = period_size as u128 * u128::from(ticks_per_second);
        self.frac_period_rest = self.frac_period_size;
        self.elapsed = 0;
        Ok(())
    }

    /// Whether [`reset`](Self::reset) has succeeded at least once
    pub fn is_configured(&self) -> bool {
        self.rate != 0
    }

    /// Begin measuring time from tick `now`
    pub fn set_base(&mut self, now: u64) {
        self.base = now;
    }

    /// Tick of the last position update
    pub fn base(&self) -> u64 {
        self.base
    }

    /// Account for all time passed up to tick `now`
    ///
    /// Calling this again with the same `now` has no effect.
    pub fn advance(&mut self, now: u64) {
        let delta = now.wrapping_sub(self.base);
        if delta == 0 {
            return;
        }
        debug_assert!(self.is_configured(), "advanced before reset");
        self.base = self.base.wrapping_add(delta);
        let delta = u128::from(delta) * u128::from(self.rate);

        self.frac_pos = (self.frac_pos + delta) % self.frac_buffer_size;

        // Every boundary at or before `delta` counts, however many a late call covers
        if self.frac_period_rest <= delta {
            let crossed = (delta - self.frac_period_rest) / self.frac_period_size + 1;
            self.elapsed = self.elapsed.saturating_add(crossed as u64);
            self.frac_period_rest += crossed * self.frac_period_size;
        }
        self.frac_period_rest -= delta;
    }

    /// Frame position within the buffer as of the last `advance`
    pub fn position_frames(&self) -> usize {
        if self.ticks_per_second == 0 {
            return 0;
        }
        (self.frac_pos / u128::from(self.ticks_per_second)) as usize
    }

    /// Ticks until the next period boundary, rounded up; never zero
    pub fn next_rearm_delay(&self) -> u64 {
        debug_assert!(self.frac_period_rest > 0);
        let rate = u128::from(self.rate.max(1));
        let ticks = (self.frac_period_rest + rate - 1) / rate;
        (ticks.max(1)).min(u128::from(u64::MAX)) as u64
    }

    /// Periods completed since the last call to `take_elapsed`
    pub fn elapsed(&self) -> u64 {
        self.elapsed
    }

    /// Return and clear the number of periods completed since the last call
    pub fn take_elapsed(&mut self) -> u64 {
        std::mem::take(&mut self.elapsed)
    }

    /// Frames per second
    pub fn rate(&self) -> u32 {
        self.rate as u32
    }

    /// Clock ticks per second
    pub fn ticks_per_second(&self) -> u64 {
        self.ticks_per_second
    }
}
