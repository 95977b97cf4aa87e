use std::io;

use thiserror::Error;

use crate::{EngineId, Format, State, StreamId};

/// Failures reported by engines and the registry
#[derive(Error, Debug)]
pub enum Error {
    /// Memory for an engine, its table slot, or its ring buffer could not be allocated
    #[error("out of memory")]
    OutOfMemory,

    /// The engine's timer context could not be started
    #[error("failed to start timer: {0}")]
    Timer(#[source] io::Error),

    /// Operation called in a state its contract does not allow
    #[error("cannot {op} while {state:?}")]
    InvalidState {
        /// Operation that was attempted
        op: &'static str,
        /// State the engine was in
        state: State,
    },

    /// Handle does not name an open engine
    #[error("no engine for {0:?}")]
    UnknownEngine(EngineId),

    /// Stream already has an engine
    #[error("{0:?} is already open")]
    StreamBusy(StreamId),

    /// Sample rate of zero
    #[error("sample rate must be nonzero")]
    ZeroRate,

    /// Period of zero frames
    #[error("period size must be nonzero")]
    ZeroPeriod,

    /// Buffer of zero frames
    #[error("buffer size must be nonzero")]
    ZeroBuffer,

    /// Period larger than the buffer it divides
    #[error("period of {period} frames exceeds buffer of {buffer} frames")]
    PeriodExceedsBuffer {
        /// Requested period, in frames
        period: usize,
        /// Requested buffer, in frames
        buffer: usize,
    },

    /// Rate outside the hardware's range
    #[error("unsupported sample rate {0} Hz")]
    RateUnsupported(u32),

    /// Channel count outside the hardware's range
    #[error("unsupported channel count {0}")]
    ChannelsUnsupported(u32),

    /// Format the hardware does not list
    #[error("unsupported format {0:?}")]
    FormatUnsupported(Format),

    /// Buffer larger than the hardware allows
    #[error("buffer of {bytes} bytes exceeds maximum of {max}")]
    BufferTooLarge {
        /// Requested buffer, in bytes
        bytes: usize,
        /// Hardware maximum, in bytes
        max: usize,
    },

    /// Period size in bytes outside the hardware's range
    #[error("period of {bytes} bytes outside {min}..={max}")]
    PeriodBytesOutOfRange {
        /// Requested period, in bytes
        bytes: usize,
        /// Hardware minimum
        min: usize,
        /// Hardware maximum
        max: usize,
    },

    /// Number of periods per buffer outside the hardware's range
    #[error("{count} periods outside {min}..={max}")]
    PeriodCountOutOfRange {
        /// Periods per buffer
        count: usize,
        /// Hardware minimum
        min: usize,
        /// Hardware maximum
        max: usize,
    },

    /// Feeder source holds no data
    #[error("source is empty")]
    EmptySource,
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, Error>;
