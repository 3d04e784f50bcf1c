use crate::config::{ConfigError, SessionConfig};
use crate::context::AbortHandle;
use crate::scheduler::{Scheduler, TickIo};
use crate::trial::Trial;
use cogex_core::{
    AbortCause, AbortRequest, Clock, EventBus, LinkEvent, PollMode, Renderer, TrialResult,
    TrialStatus,
};
use cogex_devices::{DeviceError, DeviceHub, DeviceSource};
use cogex_timing::{ClockError, FrameStats, FrameTimer, MonotonicClock};
use cogex_tracker::{SyncEstimate, TrackerBridge, TrackerLink};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Clock(#[from] ClockError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Device(#[from] DeviceError),
}

pub struct SessionBuilder {
    config: SessionConfig,
    clock: Option<Arc<dyn Clock>>,
    devices: Vec<(Box<dyn DeviceSource>, PollMode)>,
    tracker: Option<(Box<dyn TrackerLink>, PollMode)>,
}

impl SessionBuilder {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            clock: None,
            devices: Vec::new(),
            tracker: None,
        }
    }

    /// Defaults to the host monotonic clock.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn device(mut self, source: Box<dyn DeviceSource>, mode: PollMode) -> Self {
        self.devices.push((source, mode));
        self
    }

    pub fn tracker(mut self, link: Box<dyn TrackerLink>, mode: PollMode) -> Self {
        self.tracker = Some((link, mode));
        self
    }

    /// Fails if the clock is unusable, the config is invalid or a device
    /// cannot be attached. A tracker that refuses the connection is logged
    /// and the session runs without one.
    pub fn build<R: Renderer>(self, renderer: R) -> Result<Session<R>, SessionError> {
        self.config.validate()?;
        let clock: Arc<dyn Clock> = match self.clock {
            Some(clock) => clock,
            None => Arc::new(MonotonicClock::new()?),
        };
        let bus = EventBus::new(self.config.bus_capacity);
        let mut devices = DeviceHub::with_config(
            Arc::clone(&clock),
            bus.registrar(),
            self.config.normalizer.clone(),
        );
        for (source, mode) in self.devices {
            devices.attach(source, mode)?;
        }
        let tracker = match self.tracker {
            Some((link, mode)) => match TrackerBridge::connect(
                link,
                Arc::clone(&clock),
                &bus.registrar(),
                &self.config.tracker,
                mode,
            ) {
                Ok(bridge) => Some(bridge),
                Err(err) => {
                    tracing::warn!(error = %err, "tracker unavailable, running without it");
                    None
                }
            },
            None => None,
        };
        tracing::info!(
            clock = clock.description(),
            resolution_ns = clock.resolution().as_nanos() as u64,
            devices = devices.attached().len(),
            tracker = tracker.is_some(),
            "session ready"
        );
        Ok(Session {
            frame_interval: self.config.frame_interval(),
            config: self.config,
            clock,
            bus,
            devices,
            tracker,
            renderer,
            abort: AbortHandle::new(),
            link_history: Vec::new(),
            trials_run: 0,
        })
    }
}

/// Owns the clock, bus, devices, tracker bridge and renderer for a run of
/// trials. Trials run one at a time on the calling thread.
pub struct Session<R: Renderer> {
    config: SessionConfig,
    clock: Arc<dyn Clock>,
    bus: EventBus,
    devices: DeviceHub,
    tracker: Option<TrackerBridge>,
    renderer: R,
    abort: AbortHandle,
    link_history: Vec<LinkEvent>,
    frame_interval: Duration,
    trials_run: u64,
}

impl<R: Renderer> Session<R> {
    pub fn builder(config: SessionConfig) -> SessionBuilder {
        SessionBuilder::new(config)
    }

    /// A scheduler for `trial`, to be stepped tick by tick.
    pub fn scheduler<'s>(&'s mut self, trial: &'s mut Trial) -> Scheduler<'s, R> {
        self.trials_run += 1;
        let io = TickIo {
            renderer: &mut self.renderer,
            bus: &mut self.bus,
            devices: &mut self.devices,
            tracker: self.tracker.as_mut(),
            link_history: &mut self.link_history,
            abort: self.abort.clone(),
            eye: self.config.tracker.eye_used,
            frame_interval: self.frame_interval,
            miss_factor: self.config.deadline_miss_factor,
        };
        Scheduler::new(io, trial, self.trials_run)
    }

    pub fn run(&mut self, trial: &mut Trial) -> TrialResult {
        self.scheduler(trial).run_to_end()
    }

    /// Runs `trials` in order. A `Repeat` abort reruns the same trial, an
    /// `EndSession` abort stops after recording it.
    pub fn run_all(&mut self, trials: &mut [Trial]) -> Vec<TrialResult> {
        let mut results = Vec::with_capacity(trials.len());
        let mut i = 0;
        while let Some(trial) = trials.get_mut(i) {
            let result = self.run(trial);
            let status = result.status.clone();
            results.push(result);
            match status {
                TrialStatus::Aborted(AbortCause::Requested(AbortRequest::Repeat)) => {
                    tracing::debug!(trial = i, "repeating trial");
                }
                TrialStatus::Aborted(AbortCause::Requested(AbortRequest::EndSession)) => {
                    tracing::info!(trial = i, "session ended by request");
                    break;
                }
                _ => i += 1,
            }
        }
        results
    }

    /// Ticks the renderer `frames` times without a trial and adopts the
    /// measured mean as the frame interval. Events that arrived meanwhile
    /// are discarded.
    pub fn calibrate_frames(&mut self, frames: usize) -> FrameStats {
        let mut timer = FrameTimer::new(frames);
        let mut last = self.renderer.frame_tick();
        timer.record_tick(last);
        for _ in 0..frames {
            last = self.renderer.frame_tick();
            timer.record_tick(last);
        }
        let stats = timer.stats();
        if stats.samples > 0 && stats.average_frame_time_ns > 0.0 {
            self.frame_interval = Duration::from_nanos(stats.average_frame_time_ns.round() as u64);
        }
        self.devices.poll_inline();
        if let Some(tracker) = self.tracker.as_mut() {
            tracker.pump_inline();
        }
        let discarded = self.bus.discard_before(last);
        tracing::info!(
            fps = stats.effective_fps,
            jitter_us = stats.jitter_ns / 1e3,
            discarded,
            "frame calibration done"
        );
        stats
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn frame_interval(&self) -> Duration {
        self.frame_interval
    }

    pub fn trials_run(&self) -> u64 {
        self.trials_run
    }

    /// Every link status change seen so far, including those between trials.
    pub fn link_history(&self) -> &[LinkEvent] {
        &self.link_history
    }

    pub fn devices_mut(&mut self) -> &mut DeviceHub {
        &mut self.devices
    }

    pub fn tracker_connected(&self) -> bool {
        self.tracker.as_ref().is_some_and(TrackerBridge::is_connected)
    }

    pub fn tracker_estimate(&self) -> Option<SyncEstimate> {
        self.tracker.as_ref().and_then(TrackerBridge::estimate)
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut R {
        &mut self.renderer
    }

    /// Stops device pollers and the tracker pump, returning the renderer.
    pub fn close(mut self) -> R {
        self.devices.shutdown();
        if let Some(tracker) = self.tracker.as_mut() {
            tracker.shutdown();
        }
        tracing::debug!(trials = self.trials_run, "session closed");
        self.renderer
    }
}

/// Runs one trial to completion in `session`.
pub fn run<R: Renderer>(session: &mut Session<R>, trial: &mut Trial) -> TrialResult {
    session.run(trial)
}
