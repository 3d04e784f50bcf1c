use crate::block::{Block, Step};
use crate::context::{AbortHandle, ExecutionContext, PresentationCommand};
use crate::trial::Trial;
use cogex_core::{
    AbortCause, BusEvent, EndReason, EventBus, Eye, LinkEvent, LinkNotice, LinkStatus, Renderer,
    Timestamp, TimingStats, TrackerEventKind, TrialResult, TrialStatus,
};
use cogex_devices::DeviceHub;
use cogex_timing::FrameTimer;
use cogex_tracker::TrackerBridge;
use std::time::Duration;

/// Lifecycle of one trial run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchedulerState {
    Idle,
    /// Tree reset and validated, trial start not yet stamped.
    Armed,
    Running,
    /// Every active leaf is waiting for an event or an external stop.
    Suspended,
    Completed,
    Aborted,
}

impl SchedulerState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SchedulerState::Completed | SchedulerState::Aborted)
    }
}

/// Session resources a scheduler borrows for one trial.
pub(crate) struct TickIo<'a, R> {
    pub renderer: &'a mut R,
    pub bus: &'a mut EventBus,
    pub devices: &'a mut DeviceHub,
    pub tracker: Option<&'a mut TrackerBridge>,
    pub link_history: &'a mut Vec<LinkEvent>,
    pub abort: AbortHandle,
    pub eye: Eye,
    pub frame_interval: Duration,
    pub miss_factor: f64,
}

struct Run {
    ctx: ExecutionContext,
    start: Timestamp,
    timer: FrameTimer,
    stats: TimingStats,
    notices: Vec<LinkNotice>,
    // Markers staged this tick; sent once the frame that shows them has flipped.
    queued: Vec<String>,
    events: Vec<BusEvent>,
    dropped_at_start: u64,
    failed_at_start: u64,
}

/// Drives one trial's block tree, one tick per display frame.
///
/// Each tick: observe the abort flag, wait for the frame, send the markers
/// of the previous tick, poll inline producers, drain the bus up to now,
/// expire timed blocks, dispatch events, resolve input timeouts, advance the
/// tree and hand presentation changes to the renderer.
pub struct Scheduler<'a, R: Renderer> {
    io: TickIo<'a, R>,
    trial: &'a mut Trial,
    number: u64,
    state: SchedulerState,
    run: Option<Run>,
    result: Option<TrialResult>,
}

impl<'a, R: Renderer> Scheduler<'a, R> {
    pub(crate) fn new(io: TickIo<'a, R>, trial: &'a mut Trial, number: u64) -> Self {
        Self {
            io,
            trial,
            number,
            state: SchedulerState::Idle,
            run: None,
            result: None,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Trial start, once running.
    pub fn started_at(&self) -> Option<Timestamp> {
        self.run.as_ref().map(|run| run.start)
    }

    pub fn context(&self) -> Option<&ExecutionContext> {
        self.run.as_ref().map(|run| &run.ctx)
    }

    /// Runs one tick (the first call starts the trial). No-op once terminal.
    pub fn tick(&mut self) -> SchedulerState {
        match self.state {
            SchedulerState::Idle => self.start(),
            SchedulerState::Running | SchedulerState::Suspended => {
                if let Some(mut run) = self.run.take() {
                    match self.step(&mut run) {
                        Some(status) => self.complete(run, status),
                        None => self.run = Some(run),
                    }
                }
            }
            SchedulerState::Armed | SchedulerState::Completed | SchedulerState::Aborted => {}
        }
        self.state
    }

    /// Ticks until the trial completes or aborts.
    pub fn run_to_end(mut self) -> TrialResult {
        loop {
            self.tick();
            if let Some(result) = self.result.take() {
                return result;
            }
        }
    }

    pub fn into_result(self) -> Option<TrialResult> {
        self.result
    }

    fn set_state(&mut self, state: SchedulerState) {
        if self.state != state {
            tracing::trace!(trial = self.number, from = ?self.state, to = ?state, "scheduler state");
            self.state = state;
        }
    }

    fn start(&mut self) {
        self.trial.root_mut().reset();
        self.set_state(SchedulerState::Armed);
        tracing::debug!(
            trial = self.number,
            label = self.trial.label(),
            blocks = self.trial.block_count(),
            "trial armed"
        );

        let dropped_at_start = self.io.bus.events_dropped();
        let failed_at_start = self
            .io
            .tracker
            .as_deref()
            .map_or(0, TrackerBridge::markers_failed);
        let start = self.io.renderer.frame_tick();

        let mut ctx = ExecutionContext::new(start, self.io.abort.clone(), self.io.eye);
        ctx.tracker_available = self
            .io
            .tracker
            .as_deref()
            .is_some_and(TrackerBridge::is_connected);

        let mut timer = FrameTimer::default();
        timer.record_tick(start);
        let mut run = Run {
            ctx,
            start,
            timer,
            stats: TimingStats::default(),
            notices: Vec::new(),
            queued: vec![format!("TRIALID {}", self.number)],
            events: Vec::new(),
            dropped_at_start,
            failed_at_start,
        };
        run.queued.extend(
            self.trial
                .interest_areas()
                .iter()
                .enumerate()
                .map(|(i, area)| area.viewer_message(i + 1)),
        );
        send_markers(self.io.tracker.as_deref(), &mut run.queued);
        self.set_state(SchedulerState::Running);
        tracing::debug!(trial = self.number, %start, "trial running");

        let root = self.trial.root_mut();
        root.activate(&mut run.ctx);
        let step = settle(root, &mut run.ctx);
        apply_outbox(self.io.renderer, &mut run.ctx, &mut run.queued);

        match self.verdict(&mut run, step) {
            Some(status) => self.complete(run, status),
            None => self.run = Some(run),
        }
    }

    fn step(&mut self, run: &mut Run) -> Option<TrialStatus> {
        if let Some(request) = self.io.abort.take() {
            tracing::debug!(trial = self.number, ?request, "abort observed");
            return Some(TrialStatus::Aborted(AbortCause::Requested(request)));
        }

        let now = self.io.renderer.frame_tick().max(run.ctx.now());
        run.ctx.set_now(now);
        run.stats.ticks += 1;
        if let Some(interval) = run.timer.record_tick(now) {
            let budget = self.io.frame_interval.as_secs_f64() * self.io.miss_factor;
            if interval.as_secs_f64() > budget {
                run.stats.deadline_misses += 1;
                tracing::debug!(
                    trial = self.number,
                    interval_ms = interval.as_secs_f64() * 1e3,
                    "deadline miss"
                );
            }
        }
        send_markers(self.io.tracker.as_deref(), &mut run.queued);

        self.io.devices.poll_inline();
        if let Some(tracker) = self.io.tracker.as_deref_mut() {
            tracker.pump_inline();
        }
        let mut events = std::mem::take(&mut run.events);
        self.io.bus.drain_into(now, &mut events);

        let root = self.trial.root_mut();
        // Deadlines first: a display that is due ends before any event
        // arriving in the same tick can cancel it.
        root.expire(&mut run.ctx);
        settle(root, &mut run.ctx);

        for ev in events.drain(..) {
            if let BusEvent::Link(link) = &ev {
                self.io.link_history.push(link.clone());
            }
            if ev.timestamp() < run.start {
                run.stats.stale_events += 1;
                continue;
            }
            run.stats.events_delivered += 1;
            dispatch(root, &ev, run, self.number);
        }
        run.events = events;

        root.resolve_timeouts(&mut run.ctx);
        let step = settle(root, &mut run.ctx);
        apply_outbox(self.io.renderer, &mut run.ctx, &mut run.queued);
        self.verdict(run, step)
    }

    fn verdict(&mut self, run: &mut Run, step: Step) -> Option<TrialStatus> {
        if let Some(fault) = run.ctx.fault.take() {
            return Some(TrialStatus::Aborted(AbortCause::Fault(fault)));
        }
        match step {
            Step::Done => Some(match self.io.abort.take() {
                Some(request) => TrialStatus::Aborted(AbortCause::Requested(request)),
                None => TrialStatus::Completed,
            }),
            Step::Suspend => {
                self.set_state(SchedulerState::Suspended);
                None
            }
            Step::Continue => {
                self.set_state(SchedulerState::Running);
                None
            }
        }
    }

    fn complete(&mut self, mut run: Run, status: TrialStatus) {
        if !status.is_completed() {
            self.trial
                .root_mut()
                .stop(EndReason::Aborted, &mut run.ctx);
            apply_outbox(self.io.renderer, &mut run.ctx, &mut run.queued);
        }
        run.queued
            .push(format!("TRIAL_RESULT {}", status.tracker_code()));
        send_markers(self.io.tracker.as_deref(), &mut run.queued);

        let end = run.ctx.now();
        run.stats.frame = run.timer.stats();
        let markers_failed = self
            .io
            .tracker
            .as_deref()
            .map_or(0, TrackerBridge::markers_failed)
            .saturating_sub(run.failed_at_start);
        let result = TrialResult {
            trial: self.number,
            label: self.trial.label().to_string(),
            status,
            started_at: run.start,
            duration: end - run.start,
            outcomes: std::mem::take(&mut run.ctx.outcomes),
            timings: std::mem::take(&mut run.ctx.timings),
            stats: run.stats,
            events_dropped: self
                .io
                .bus
                .events_dropped()
                .saturating_sub(run.dropped_at_start),
            link_notices: run.notices,
            markers_failed,
        };

        if result.status.is_completed() {
            self.set_state(SchedulerState::Completed);
            tracing::info!(
                trial = result.trial,
                label = %result.label,
                duration_ms = result.duration.as_secs_f64() * 1e3,
                ticks = result.stats.ticks,
                deadline_misses = result.stats.deadline_misses,
                "trial completed"
            );
        } else {
            self.set_state(SchedulerState::Aborted);
            tracing::info!(
                trial = result.trial,
                label = %result.label,
                status = ?result.status,
                "trial aborted"
            );
        }
        if result.events_dropped > 0 {
            tracing::warn!(trial = result.trial, dropped = result.events_dropped, "events dropped");
        }
        self.result = Some(result);
    }
}

fn dispatch(root: &mut Block, ev: &BusEvent, run: &mut Run, trial: u64) {
    let ctx = &mut run.ctx;
    match ev {
        BusEvent::Device(device) => ctx.last_device = Some(device.clone()),
        BusEvent::Tracker(tracker) => {
            if !matches!(tracker.kind(), TrackerEventKind::MessageAck { .. }) {
                ctx.last_tracker = Some(tracker.clone());
            }
        }
        BusEvent::Link(link) => {
            run.notices.push(LinkNotice {
                status: link.status.clone(),
                at: ctx.rel(link.timestamp),
            });
            if link.status == LinkStatus::Disconnected {
                ctx.tracker_available = false;
                match root.tracker_dependent() {
                    Some(block) => ctx.fail(cogex_core::Fault::TrackerDisconnected { block }),
                    None => tracing::warn!(trial, "tracker lost, continuing without gaze data"),
                }
            }
        }
    }
    root.on_event(ev, ctx);
    apply_cancels(root, ctx);
}

fn apply_cancels(root: &mut Block, ctx: &mut ExecutionContext) {
    for label in std::mem::take(&mut ctx.pending_cancels) {
        if !root.cancel_labelled(&label, ctx) {
            tracing::trace!(block = %label, "cancel target not running");
        }
    }
}

/// Advances the tree until no cancellation is left pending.
fn settle(root: &mut Block, ctx: &mut ExecutionContext) -> Step {
    loop {
        apply_cancels(root, ctx);
        let step = root.advance(ctx);
        if ctx.pending_cancels.is_empty() {
            return step;
        }
    }
}

fn apply_outbox<R: Renderer>(renderer: &mut R, ctx: &mut ExecutionContext, queued: &mut Vec<String>) {
    for command in ctx.outbox.drain(..) {
        match command {
            PresentationCommand::Present(surface) => renderer.present(&surface),
            PresentationCommand::Withdraw(surface) => renderer.withdraw(&surface),
            PresentationCommand::Marker(label) => queued.push(label),
        }
    }
}

fn send_markers(tracker: Option<&TrackerBridge>, queued: &mut Vec<String>) {
    let Some(tracker) = tracker else {
        queued.clear();
        return;
    };
    for label in queued.drain(..) {
        // Failures are counted by the bridge and reported in the result.
        if let Err(err) = tracker.send_marker(&label) {
            tracing::trace!(%label, error = %err, "marker not sent");
        }
    }
}
