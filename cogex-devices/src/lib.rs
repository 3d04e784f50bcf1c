//! Device abstraction layer: turns heterogeneous input hardware into
//! normalized, timestamped events on the bus.

pub mod hub;
pub mod normalize;
pub mod scripted;
pub mod source;

pub use hub::{DeviceHub, PollResult};
pub use normalize::{Normalizer, NormalizerConfig};
pub use scripted::ScriptedDevice;
pub use source::{DeviceError, DeviceSource, RawInput, RawSignal};
