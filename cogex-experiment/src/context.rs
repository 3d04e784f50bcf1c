use cogex_core::{
    AbortRequest, BlockTiming, DeviceEvent, Eye, EyetrackerEvent, Fault, InputOutcome, Surface,
    Timestamp,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

const NO_REQUEST: u8 = 0;

/// Shared abort flag, observed by the scheduler at the top of every tick.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle(Arc<AtomicU8>);

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// The latest request wins if several arrive within one tick.
    pub fn request(&self, request: AbortRequest) {
        let code = match request {
            AbortRequest::Skip => 1,
            AbortRequest::Repeat => 2,
            AbortRequest::EndSession => 3,
        };
        self.0.store(code, Ordering::Release);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::Acquire) != NO_REQUEST
    }

    pub(crate) fn take(&self) -> Option<AbortRequest> {
        match self.0.swap(NO_REQUEST, Ordering::AcqRel) {
            1 => Some(AbortRequest::Skip),
            2 => Some(AbortRequest::Repeat),
            3 => Some(AbortRequest::EndSession),
            _ => None,
        }
    }
}

/// Side effect requested by a block, applied by the scheduler at the end
/// of the tick.
#[derive(Debug, Clone, PartialEq)]
pub enum PresentationCommand {
    Present(Surface),
    Withdraw(Surface),
    Marker(String),
}

/// Mutable state of one running trial.
#[derive(Debug)]
pub struct ExecutionContext {
    now: Timestamp,
    trial_start: Timestamp,
    pub(crate) last_device: Option<DeviceEvent>,
    pub(crate) last_tracker: Option<EyetrackerEvent>,
    pub(crate) outcomes: Vec<InputOutcome>,
    flags: HashMap<String, bool>,
    pub(crate) pending_cancels: Vec<String>,
    pub(crate) iteration: u32,
    abort: AbortHandle,
    pub(crate) fault: Option<Fault>,
    pub(crate) outbox: Vec<PresentationCommand>,
    pub(crate) timings: Vec<BlockTiming>,
    eye: Eye,
    pub(crate) tracker_available: bool,
}

impl ExecutionContext {
    pub fn new(trial_start: Timestamp, abort: AbortHandle, eye: Eye) -> Self {
        Self {
            now: trial_start,
            trial_start,
            last_device: None,
            last_tracker: None,
            outcomes: Vec::new(),
            flags: HashMap::new(),
            pending_cancels: Vec::new(),
            iteration: 0,
            abort,
            fault: None,
            outbox: Vec::new(),
            timings: Vec::new(),
            eye,
            tracker_available: false,
        }
    }

    pub fn now(&self) -> Timestamp {
        self.now
    }

    pub(crate) fn set_now(&mut self, now: Timestamp) {
        self.now = self.now.max(now);
    }

    pub fn trial_start(&self) -> Timestamp {
        self.trial_start
    }

    pub fn elapsed(&self) -> Duration {
        self.now - self.trial_start
    }

    /// `ts` relative to trial start.
    pub fn rel(&self, ts: Timestamp) -> Duration {
        ts.saturating_since(self.trial_start)
    }

    pub fn last_device_event(&self) -> Option<&DeviceEvent> {
        self.last_device.as_ref()
    }

    pub fn last_tracker_event(&self) -> Option<&EyetrackerEvent> {
        self.last_tracker.as_ref()
    }

    /// Most recent outcome recorded under `name` (loops may record several).
    pub fn outcome(&self, name: &str) -> Option<&InputOutcome> {
        self.outcomes.iter().rev().find(|o| o.name == name)
    }

    pub fn outcomes(&self) -> &[InputOutcome] {
        &self.outcomes
    }

    pub fn flag(&self, name: &str) -> bool {
        self.flags.get(name).copied().unwrap_or(false)
    }

    pub fn set_flag(&mut self, name: impl Into<String>, value: bool) {
        self.flags.insert(name.into(), value);
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn eye(&self) -> Eye {
        self.eye
    }

    pub fn tracker_available(&self) -> bool {
        self.tracker_available
    }

    pub fn abort_handle(&self) -> &AbortHandle {
        &self.abort
    }

    pub fn is_abort_requested(&self) -> bool {
        self.abort.is_requested()
    }

    pub(crate) fn fail(&mut self, fault: Fault) {
        if self.fault.is_none() {
            tracing::warn!(?fault, "trial fault");
            self.fault = Some(fault);
        }
    }
}
