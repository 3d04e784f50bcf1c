//! Time sources for the presentation core.
//!
//! Every subsystem stamps with the same [`Clock`]; [`Timestamp`] values are
//! therefore comparable across devices, the eyetracker bridge and the scheduler.

pub mod clock;
pub mod timer;

pub use clock::{Clock, ClockError, EpochOffset, MonotonicClock, SimClock, Timestamp};
pub use timer::{precise_sleep, sleep_until, FrameStats, FrameTimer};
