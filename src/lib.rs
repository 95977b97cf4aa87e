//! Timer-driven virtual PCM playback
//!
//! Emulates a sound card that has no DMA engine of its own: a software timer stands in for the
//! period interrupt, advancing a playback position according to elapsed time and notifying
//! consumers whenever a period of audio has been played.
//!
//! ```
//! use std::sync::Arc;
//!
//! let clock = Arc::new(softpcm::ManualClock::new(1000));
//! let engine = softpcm::engine()
//!     .clock(clock.clone())
//!     .source(softpcm::tone::ramp(256))
//!     .build()?;
//! engine.prepare(softpcm::Params {
//!     rate: 8000,
//!     buffer_size: 8000,
//!     period_size: 2000,
//! })?;
//! let mut waiter = engine.waiter();
//! engine.start()?;
//!
//! // A quarter second later, one period has been played
//! clock.advance(250);
//! engine.poll_timer();
//! waiter.wait();
//! assert_eq!(engine.pointer(), 2000);
//! engine.stop()?;
//! # Ok::<(), softpcm::Error>(())
//! ```

#![warn(missing_docs)]

mod clock;
mod engine;
mod error;
mod feeder;
mod hardware;
mod notify;
mod registry;
mod timer;
pub mod tone;
mod tracker;

pub use clock::{Clock, ManualClock, MonotonicClock, SystemClock, DEFAULT_HZ};
pub use engine::{engine, Backend, Builder, Engine, State, Trigger};
pub use error::{Error, Result};
pub use feeder::Feeder;
pub use hardware::{Format, Formats, Hardware, Model, Params};
pub use notify::{PeriodCallback, PeriodWaiter};
pub use registry::{EngineId, Registry, StreamId};
pub use tracker::PositionTracker;
