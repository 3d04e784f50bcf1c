//! Eyetracker synchronization bridge.
//!
//! Sends sync markers over the tracker link, fits the tracker clock against
//! the local clock from their echoes and republishes tracker events on the
//! bus in local time.

pub mod bridge;
pub mod config;
pub mod link;
pub mod sim;
pub mod sync;

pub use bridge::{MarkerSender, TrackerBridge, TrackerPump};
pub use config::TrackerConfig;
pub use link::{LinkError, RawTrackerEvent, RawTrackerKind, TrackerLink};
pub use sim::SimulatedTracker;
pub use sync::{ClockSync, SyncEstimate};
