use cogex_timing::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        DeviceId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DeviceId {
    fn from(value: &str) -> Self {
        DeviceId::new(value)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceKind {
    Keyboard,
    Gamepad,
    Voice,
    Digital,
}

/// Normalized device payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DeviceInput {
    Key { name: String, pressed: bool },
    Button { index: u8, pressed: bool },
    Axis { index: u8, value: f32 },
    VoiceOnset { level: f32 },
    VoiceOffset { level: f32 },
    Line { line: u8, high: bool },
    /// The device detached or stopped answering polls.
    Lost,
}

/// A normalized input observation. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceEvent {
    device: DeviceId,
    kind: DeviceKind,
    input: DeviceInput,
    timestamp: Timestamp,
}

impl DeviceEvent {
    pub fn new(device: DeviceId, kind: DeviceKind, input: DeviceInput, timestamp: Timestamp) -> Self {
        Self {
            device,
            kind,
            input,
            timestamp,
        }
    }

    pub fn device(&self) -> &DeviceId {
        &self.device
    }

    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    pub fn input(&self) -> &DeviceInput {
        &self.input
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn is_lost(&self) -> bool {
        matches!(self.input, DeviceInput::Lost)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Eye {
    Left,
    #[default]
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GazePoint {
    pub x: f32,
    pub y: f32,
}

impl GazePoint {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Tracker clock reading, in tracker ticks.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TrackerTime(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FixationPhase {
    Start,
    Update,
    End,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TrackerEventKind {
    Gaze {
        eye: Eye,
        point: GazePoint,
    },
    /// `point` is the start gaze for `Start`, the running average otherwise.
    Fixation {
        eye: Eye,
        phase: FixationPhase,
        point: GazePoint,
        started: Timestamp,
    },
    Saccade {
        eye: Eye,
        from: GazePoint,
        to: GazePoint,
    },
    Blink {
        eye: Eye,
    },
    /// The tracker echoed a [`SyncMarker`].
    MessageAck {
        seq: u64,
        label: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EyetrackerEvent {
    kind: TrackerEventKind,
    tracker_time: TrackerTime,
    timestamp: Timestamp,
}

impl EyetrackerEvent {
    pub fn new(kind: TrackerEventKind, tracker_time: TrackerTime, timestamp: Timestamp) -> Self {
        Self {
            kind,
            tracker_time,
            timestamp,
        }
    }

    pub fn kind(&self) -> &TrackerEventKind {
        &self.kind
    }

    pub fn tracker_time(&self) -> TrackerTime {
        self.tracker_time
    }

    /// Translated local timestamp.
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn eye(&self) -> Option<Eye> {
        match &self.kind {
            TrackerEventKind::Gaze { eye, .. }
            | TrackerEventKind::Fixation { eye, .. }
            | TrackerEventKind::Saccade { eye, .. }
            | TrackerEventKind::Blink { eye } => Some(*eye),
            TrackerEventKind::MessageAck { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LinkStatus {
    SyncDegraded { offset_stddev: Duration },
    SyncRestored,
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkEvent {
    pub status: LinkStatus,
    pub timestamp: Timestamp,
}

/// A message sent to the eyetracker to align its clock with ours.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMarker {
    pub seq: u64,
    pub label: String,
    pub local: Timestamp,
}

impl SyncMarker {
    pub fn new(seq: u64, label: impl Into<String>, local: Timestamp) -> Self {
        Self {
            seq,
            label: label.into(),
            local,
        }
    }
}

/// Tie-break rank for events sharing a timestamp; lower is delivered first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Marker,
    Link,
    Tracker,
    Device,
}

/// Everything the scheduler consumes from the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BusEvent {
    Device(DeviceEvent),
    Tracker(EyetrackerEvent),
    Link(LinkEvent),
}

impl BusEvent {
    pub fn timestamp(&self) -> Timestamp {
        match self {
            BusEvent::Device(ev) => ev.timestamp(),
            BusEvent::Tracker(ev) => ev.timestamp(),
            BusEvent::Link(ev) => ev.timestamp,
        }
    }

    pub fn priority(&self) -> Priority {
        match self {
            BusEvent::Tracker(ev) if matches!(ev.kind(), TrackerEventKind::MessageAck { .. }) => {
                Priority::Marker
            }
            BusEvent::Link(_) => Priority::Link,
            BusEvent::Tracker(_) => Priority::Tracker,
            BusEvent::Device(_) => Priority::Device,
        }
    }

    pub fn as_device(&self) -> Option<&DeviceEvent> {
        match self {
            BusEvent::Device(ev) => Some(ev),
            _ => None,
        }
    }

    pub fn as_tracker(&self) -> Option<&EyetrackerEvent> {
        match self {
            BusEvent::Tracker(ev) => Some(ev),
            _ => None,
        }
    }

    pub fn is_tracker_disconnect(&self) -> bool {
        matches!(
            self,
            BusEvent::Link(LinkEvent {
                status: LinkStatus::Disconnected,
                ..
            })
        )
    }
}

/// Where a producer's poll loop runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PollMode {
    /// A dedicated thread polling at `interval`.
    Thread { interval: Duration },
    /// Polled by the scheduler at the top of every tick (simulation, replay).
    Inline,
}
