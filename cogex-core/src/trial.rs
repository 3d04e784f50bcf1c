use crate::event::{DeviceId, LinkStatus};
use cogex_timing::{FrameStats, Timestamp};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Reason an author (or operator) asked for the trial to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AbortRequest {
    /// Drop this trial and move on.
    Skip,
    /// Drop this trial and run it again.
    Repeat,
    /// Drop this trial and end the session.
    EndSession,
}

/// Unrecoverable failure reported while a trial was running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Fault {
    /// The tracker link went down while a block that needs gaze data was active.
    TrackerDisconnected { block: String },
    Block { block: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AbortCause {
    Requested(AbortRequest),
    Fault(Fault),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrialStatus {
    Completed,
    Aborted(AbortCause),
}

impl TrialStatus {
    pub fn is_completed(&self) -> bool {
        matches!(self, TrialStatus::Completed)
    }

    pub fn is_fault(&self) -> bool {
        matches!(self, TrialStatus::Aborted(AbortCause::Fault(_)))
    }

    /// Code written to the tracker with `TRIAL_RESULT`.
    pub fn tracker_code(&self) -> i32 {
        match self {
            TrialStatus::Completed => 0,
            TrialStatus::Aborted(AbortCause::Fault(_)) => -1,
            TrialStatus::Aborted(AbortCause::Requested(AbortRequest::Skip)) => 2,
            TrialStatus::Aborted(AbortCause::Requested(AbortRequest::Repeat)) => 3,
            TrialStatus::Aborted(AbortCause::Requested(AbortRequest::EndSession)) => 27,
        }
    }
}

/// What satisfied an input wait.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Response {
    Key(String),
    Button(u8),
    VoiceOnset,
    Line(u8),
    DeviceLost(DeviceId),
    /// Gaze or fixation landed in the named interest area.
    Area(String),
    Custom(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OutcomeKind {
    Matched {
        response: Response,
        /// Event time relative to trial start.
        at: Duration,
        rt: Duration,
    },
    TimedOut {
        at: Duration,
    },
    Cancelled {
        at: Duration,
    },
}

/// Recorded result of one input wait.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputOutcome {
    pub name: String,
    /// Activation time relative to trial start.
    pub onset: Duration,
    pub kind: OutcomeKind,
    /// `None` unless the wait declared an expected response.
    pub correct: Option<bool>,
}

impl InputOutcome {
    pub fn is_matched(&self) -> bool {
        matches!(self.kind, OutcomeKind::Matched { .. })
    }

    pub fn response(&self) -> Option<&Response> {
        match &self.kind {
            OutcomeKind::Matched { response, .. } => Some(response),
            _ => None,
        }
    }

    pub fn rt(&self) -> Option<Duration> {
        match self.kind {
            OutcomeKind::Matched { rt, .. } => Some(rt),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndReason {
    Elapsed,
    Matched,
    TimedOut,
    Cancelled,
    Aborted,
}

/// Requested vs. actual on-screen (or waiting) time of one timed block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockTiming {
    pub block: String,
    pub requested: Option<Duration>,
    /// Relative to trial start.
    pub onset: Duration,
    pub offset: Duration,
    pub ended: EndReason,
}

impl BlockTiming {
    pub fn actual(&self) -> Duration {
        self.offset.saturating_sub(self.onset)
    }

    /// Signed error in nanoseconds (`actual - requested`).
    pub fn error_ns(&self) -> Option<i128> {
        self.requested
            .map(|req| self.actual().as_nanos() as i128 - req.as_nanos() as i128)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimingStats {
    pub ticks: u64,
    pub deadline_misses: u64,
    pub frame: FrameStats,
    pub events_delivered: u64,
    /// Events stamped before trial start, discarded unseen.
    pub stale_events: u64,
}

/// Link status change observed during the trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkNotice {
    pub status: LinkStatus,
    pub at: Duration,
}

/// Everything the core reports about one trial run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialResult {
    pub trial: u64,
    pub label: String,
    pub status: TrialStatus,
    pub started_at: Timestamp,
    pub duration: Duration,
    pub outcomes: Vec<InputOutcome>,
    pub timings: Vec<BlockTiming>,
    pub stats: TimingStats,
    pub events_dropped: u64,
    pub link_notices: Vec<LinkNotice>,
    /// Markers the tracker link refused (e.g. after disconnect).
    pub markers_failed: u64,
}

impl TrialResult {
    pub fn outcome(&self, name: &str) -> Option<&InputOutcome> {
        self.outcomes.iter().find(|o| o.name == name)
    }

    pub fn timing(&self, block: &str) -> Option<&BlockTiming> {
        self.timings.iter().find(|t| t.block == block)
    }

    pub fn sync_degraded(&self) -> bool {
        self.link_notices
            .iter()
            .any(|n| matches!(n.status, LinkStatus::SyncDegraded { .. }))
    }
}
