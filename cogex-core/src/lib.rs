pub mod area;
pub mod bus;
pub mod event;
pub mod phase;
pub mod render;
pub mod stimulus;
pub mod trial;

pub use area::{InterestArea, Shape};
pub use bus::{BusProducer, BusRegistrar, EventBus};
pub use cogex_timing::{Clock, Timestamp};
pub use event::{
    BusEvent, DeviceEvent, DeviceId, DeviceInput, DeviceKind, Eye, EyetrackerEvent,
    FixationPhase, GazePoint, LinkEvent, LinkStatus, PollMode, Priority, SyncMarker,
    TrackerEventKind, TrackerTime,
};
pub use phase::SessionPhase;
pub use render::Renderer;
pub use stimulus::{ArrowDirection, StimulusType, Surface, SurfaceId};
pub use trial::{
    AbortCause, AbortRequest, BlockTiming, EndReason, Fault, InputOutcome, LinkNotice,
    OutcomeKind, Response, TimingStats, TrialResult, TrialStatus,
};
