use cogex_core::{DeviceId, DeviceKind, Timestamp};

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("device {0} disconnected")]
    Disconnected(DeviceId),
    #[error("device {0} read failed: {1}")]
    Read(DeviceId, String),
    #[error("device {0} is already attached")]
    AlreadyAttached(DeviceId),
    #[error("device {0} is not attached")]
    NotAttached(DeviceId),
    #[error("poller thread for {0} panicked")]
    PollerPanicked(DeviceId),
    #[error("failed to spawn poller thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Unnormalized reading as a driver reports it.
#[derive(Debug, Clone, PartialEq)]
pub enum RawSignal {
    Key { name: String, down: bool },
    Button { index: u8, down: bool },
    Axis { index: u8, value: f32 },
    /// Microphone amplitude in `[0, 1]`.
    Level(f32),
    /// Bitmask of digital input lines, bit `n` = line `n`.
    Lines(u32),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawInput {
    pub signal: RawSignal,
    /// Hardware observation time, if the device reports one.
    pub observed_at: Option<Timestamp>,
}

impl RawInput {
    pub fn new(signal: RawSignal) -> Self {
        Self {
            signal,
            observed_at: None,
        }
    }

    pub fn observed(signal: RawSignal, at: Timestamp) -> Self {
        Self {
            signal,
            observed_at: Some(at),
        }
    }
}

/// Driver-side interface of one physical input device.
///
/// `poll` must not block for longer than a poll interval; it returns
/// whatever arrived since the previous call.
pub trait DeviceSource: Send {
    fn id(&self) -> &DeviceId;

    fn kind(&self) -> DeviceKind;

    fn poll(&mut self) -> Result<Vec<RawInput>, DeviceError>;

    fn close(&mut self) {}
}

impl<D: DeviceSource + ?Sized> DeviceSource for Box<D> {
    fn id(&self) -> &DeviceId {
        (**self).id()
    }

    fn kind(&self) -> DeviceKind {
        (**self).kind()
    }

    fn poll(&mut self) -> Result<Vec<RawInput>, DeviceError> {
        (**self).poll()
    }

    fn close(&mut self) {
        (**self).close()
    }
}
