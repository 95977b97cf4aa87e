//! Capabilities of the emulated PCM device

use std::ops::RangeInclusive;

use crate::{Error, Result};

/// Sample encoding
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Format {
    /// Unsigned 8-bit
    U8,
    /// Signed 16-bit little-endian
    S16Le,
    /// Signed 24-bit little-endian in the low bytes of a 32-bit word
    S24Le,
    /// Signed 32-bit little-endian
    S32Le,
    /// IEEE 754 single precision little-endian
    FloatLe,
}

impl Format {
    /// Storage size of one sample
    pub fn bytes_per_sample(self) -> usize {
        match self {
            Format::U8 => 1,
            Format::S16Le => 2,
            Format::S24Le | Format::S32Le | Format::FloatLe => 4,
        }
    }

    fn bit(self) -> u8 {
        match self {
            Format::U8 => 1 << 0,
            Format::S16Le => 1 << 1,
            Format::S24Le => 1 << 2,
            Format::S32Le => 1 << 3,
            Format::FloatLe => 1 << 4,
        }
    }
}

/// Set of [`Format`]s
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub struct Formats(u8);

impl Formats {
    /// No formats
    pub const NONE: Self = Self(0);

    /// Whether `format` is in the set
    pub fn contains(self, format: Format) -> bool {
        self.0 & format.bit() != 0
    }

    /// Whether the set is empty
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// The set with `format` added
    #[must_use]
    pub fn with(self, format: Format) -> Self {
        Self(self.0 | format.bit())
    }
}

impl From<Format> for Formats {
    fn from(format: Format) -> Self {
        Self::NONE.with(format)
    }
}

impl<const N: usize> From<[Format; N]> for Formats {
    fn from(formats: [Format; N]) -> Self {
        formats.iter().fold(Self::NONE, |set, &f| set.with(f))
    }
}

/// Limits within which streams may be configured
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Hardware {
    /// Supported sample encodings
    pub formats: Formats,
    /// Supported frame rates, in Hz
    pub rates: RangeInclusive<u32>,
    /// Supported channel counts
    pub channels: RangeInclusive<u32>,
    /// Largest ring buffer, in bytes
    pub buffer_bytes_max: usize,
    /// Supported period sizes, in bytes
    pub period_bytes: RangeInclusive<usize>,
    /// Supported number of periods per buffer
    pub periods: RangeInclusive<usize>,
}

impl Default for Hardware {
    /// A generic virtual card
    fn default() -> Self {
        Self {
            formats: [Format::U8, Format::S16Le].into(),
            rates: 5500..=48000,
            channels: 1..=2,
            buffer_bytes_max: MAX_BUFFER_SIZE,
            period_bytes: MIN_PERIOD_SIZE..=MAX_BUFFER_SIZE,
            periods: 1..=1024,
        }
    }
}

const MAX_BUFFER_SIZE: usize = 64 * 1024;
const MIN_PERIOD_SIZE: usize = 64;

impl Hardware {
    /// The GPIO board: unsigned 8-bit stereo at 8 kHz only
    pub fn gpio() -> Self {
        Self::default().with_model(&Model {
            formats: Format::U8.into(),
            rate_min: 8000,
            rate_max: 8000,
            channels_min: 2,
            channels_max: 2,
            ..Model::default()
        })
    }

    /// Apply every nonzero field of `model` on top of these limits
    #[must_use]
    pub fn with_model(mut self, model: &Model) -> Self {
        if !model.formats.is_empty() {
            self.formats = model.formats;
        }
        if model.buffer_bytes_max != 0 {
            self.buffer_bytes_max = model.buffer_bytes_max;
        }
        self.period_bytes = overlay(
            self.period_bytes,
            model.period_bytes_min,
            model.period_bytes_max,
        );
        self.periods = overlay(self.periods, model.periods_min, model.periods_max);
        self.rates = overlay(self.rates, model.rate_min, model.rate_max);
        self.channels = overlay(self.channels, model.channels_min, model.channels_max);
        self
    }

    /// Check that frames of `format` × `channels` can be produced
    pub fn check_layout(&self, format: Format, channels: u32) -> Result<()> {
        if !self.formats.contains(format) {
            return Err(Error::FormatUnsupported(format));
        }
        if !self.channels.contains(&channels) {
            return Err(Error::ChannelsUnsupported(channels));
        }
        Ok(())
    }

    /// Check stream parameters for frames of `frame_bytes` bytes against these limits
    pub fn check_params(&self, params: &Params, frame_bytes: usize) -> Result<()> {
        params.validate()?;
        if !self.rates.contains(&params.rate) {
            return Err(Error::RateUnsupported(params.rate));
        }
        let bytes = params.buffer_size * frame_bytes;
        if bytes > self.buffer_bytes_max {
            return Err(Error::BufferTooLarge {
                bytes,
                max: self.buffer_bytes_max,
            });
        }
        let period_bytes = params.period_size * frame_bytes;
        if !self.period_bytes.contains(&period_bytes) {
            return Err(Error::PeriodBytesOutOfRange {
                bytes: period_bytes,
                min: *self.period_bytes.start(),
                max: *self.period_bytes.end(),
            });
        }
        let count = params.buffer_size / params.period_size;
        if !self.periods.contains(&count) {
            return Err(Error::PeriodCountOutOfRange {
                count,
                min: *self.periods.start(),
                max: *self.periods.end(),
            });
        }
        Ok(())
    }
}

/// Replace whichever bounds of `range` are nonzero in `min`/`max`
fn overlay<T: Copy + Default + PartialEq>(
    range: RangeInclusive<T>,
    min: T,
    max: T,
) -> RangeInclusive<T> {
    let zero = T::default();
    let (lo, hi) = range.into_inner();
    let lo = if min != zero { min } else { lo };
    let hi = if max != zero { max } else { hi };
    lo..=hi
}

/// Per-board overrides of [`Hardware`] limits; zero fields leave the limit alone
#[derive(Debug, Clone, Default)]
pub struct Model {
    /// Replaces [`Hardware::formats`]
    pub formats: Formats,
    /// Replaces [`Hardware::buffer_bytes_max`]
    pub buffer_bytes_max: usize,
    /// Lower bound of [`Hardware::period_bytes`]
    pub period_bytes_min: usize,
    /// Upper bound of [`Hardware::period_bytes`]
    pub period_bytes_max: usize,
    /// Lower bound of [`Hardware::periods`]
    pub periods_min: usize,
    /// Upper bound of [`Hardware::periods`]
    pub periods_max: usize,
    /// Lower bound of [`Hardware::rates`], in Hz
    pub rate_min: u32,
    /// Upper bound of [`Hardware::rates`], in Hz
    pub rate_max: u32,
    /// Lower bound of [`Hardware::channels`]
    pub channels_min: u32,
    /// Upper bound of [`Hardware::channels`]
    pub channels_max: u32,
}

/// Stream configuration applied by [`Engine::prepare`](crate::Engine::prepare)
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Params {
    /// Frames per second
    pub rate: u32,
    /// Ring buffer length, in frames
    pub buffer_size: usize,
    /// Frames between period-elapsed notifications
    pub period_size: usize,
}

impl Params {
    /// Check the relations every configuration must satisfy regardless of hardware
    pub fn validate(&self) -> Result<()> {
        if self.rate == 0 {
            return Err(Error::ZeroRate);
        }
        if self.buffer_size == 0 {
            return Err(Error::ZeroBuffer);
        }
        if self.period_size == 0 {
            return Err(Error::ZeroPeriod);
        }
        if self.period_size > self.buffer_size {
            return Err(Error::PeriodExceedsBuffer {
                period: self.period_size,
                buffer: self.buffer_size,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(rate: u32, buffer_size: usize, period_size: usize) -> Params {
        Params {
            rate,
            buffer_size,
            period_size,
        }
    }

    #[test]
    fn gpio_model() {
        let hw = Hardware::gpio();
        assert_eq!(hw.rates, 8000..=8000);
        assert_eq!(hw.channels, 2..=2);
        assert!(hw.formats.contains(Format::U8));
        assert!(!hw.formats.contains(Format::S16Le));
        assert_eq!(hw.buffer_bytes_max, 64 * 1024);
        assert_eq!(hw.periods, 1..=1024);
        assert!(hw.check_layout(Format::U8, 2).is_ok());
        assert!(matches!(
            hw.check_layout(Format::U8, 1),
            Err(Error::ChannelsUnsupported(1))
        ));
        assert!(matches!(
            hw.check_layout(Format::S16Le, 2),
            Err(Error::FormatUnsupported(Format::S16Le))
        ));
    }

    #[test]
    fn check_params() {
        let hw = Hardware::gpio();
        assert!(hw.check_params(&params(8000, 8000, 2000), 2).is_ok());
        assert!(matches!(
            hw.check_params(&params(0, 8000, 2000), 2),
            Err(Error::ZeroRate)
        ));
        assert!(matches!(
            hw.check_params(&params(44100, 8000, 2000), 2),
            Err(Error::RateUnsupported(44100))
        ));
        assert!(matches!(
            hw.check_params(&params(8000, 40000, 2000), 2),
            Err(Error::BufferTooLarge { bytes: 80000, .. })
        ));
        assert!(matches!(
            hw.check_params(&params(8000, 8000, 16), 2),
            Err(Error::PeriodBytesOutOfRange { bytes: 32, .. })
        ));
        assert!(matches!(
            hw.check_params(&params(8000, 100, 200), 2),
            Err(Error::PeriodExceedsBuffer { .. })
        ));
    }

    #[test]
    fn period_count_limit() {
        let hw = Hardware::default().with_model(&Model {
            periods_max: 4,
            ..Model::default()
        });
        assert!(hw.check_params(&params(8000, 1024, 256), 1).is_ok());
        assert!(matches!(
            hw.check_params(&params(8000, 1024, 128), 1),
            Err(Error::PeriodCountOutOfRange { count: 8, max: 4, .. })
        ));
    }

    #[test]
    fn zero_model_changes_nothing() {
        assert_eq!(
            Hardware::default().with_model(&Model::default()),
            Hardware::default()
        );
    }

    #[test]
    fn sample_sizes() {
        assert_eq!(Format::U8.bytes_per_sample(), 1);
        assert_eq!(Format::S16Le.bytes_per_sample(), 2);
        assert_eq!(Format::S24Le.bytes_per_sample(), 4);
        assert_eq!(Formats::from([Format::U8, Format::FloatLe]), Formats(0b10001));
    }
}
