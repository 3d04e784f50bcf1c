use crate::participant::SimulatedParticipant;
use crate::summary::{Summary, ended_session};
use anyhow::{Context, Result};
use cogex_core::{PollMode, SessionPhase, TrialResult};
use cogex_experiment::{Session, SessionConfig, paradigm};
use cogex_render::{FramePacer, PixmapRenderer};
use cogex_timing::{Clock, FrameStats, MonotonicClock, SimClock};
use cogex_tracker::SimulatedTracker;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const CANVAS: (u32, u32) = (800, 600);
const CALIBRATION_FRAMES: usize = 120;
// Offset of the simulated tracker's clock from ours.
const TRACKER_OFFSET: Duration = Duration::from_secs(5);

/// Options the command line hands to [`App`].
#[derive(Debug, Clone, Default)]
pub struct Options {
    pub config: Option<PathBuf>,
    pub seed: u64,
    pub trials: Option<usize>,
    pub realtime: bool,
    pub json: bool,
    pub tracker: bool,
}

/// Everything a full run produced.
#[derive(Debug, Default, Serialize)]
pub struct Report {
    pub seed: u64,
    pub calibration: Option<FrameStats>,
    pub practice: Vec<TrialResult>,
    pub experiment: Vec<TrialResult>,
    pub summary: Summary,
    pub tracker_markers: usize,
}

pub struct App {
    options: Options,
    config: SessionConfig,
}

impl App {
    pub fn new(options: Options) -> Result<Self> {
        let mut config = match &options.config {
            Some(path) => SessionConfig::load(path)?,
            None => SessionConfig::default(),
        };
        if let Some(n) = options.trials {
            config.paradigm.experiment_trials = n;
            config.paradigm.practice_trials = config.paradigm.practice_trials.min(n);
        }
        config.validate().context("invalid session configuration")?;
        Ok(Self { options, config })
    }

    pub fn run(self) -> Result<Report> {
        let interval = self.config.frame_interval();
        let (clock, pacer): (Arc<dyn Clock>, FramePacer) = if self.options.realtime {
            let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new()?);
            (Arc::clone(&clock), FramePacer::realtime(clock, interval))
        } else {
            let sim = SimClock::new();
            (Arc::new(sim.clone()), FramePacer::simulated(sim, interval))
        };
        info!(
            clock = clock.description(),
            resolution_ns = clock.resolution().as_nanos() as u64,
            refresh_hz = self.config.refresh_rate_hz,
            seed = self.options.seed,
            "starting session"
        );

        let (device_mode, tracker_mode) = if self.options.realtime {
            (
                self.config.device_poll_mode(),
                self.config.tracker_poll_mode(),
            )
        } else {
            (PollMode::Inline, PollMode::Inline)
        };

        let participant = SimulatedParticipant::new(
            "participant",
            &self.config.paradigm.response_key,
            Arc::clone(&clock),
            self.options.seed,
        );
        let renderer = PixmapRenderer::new(CANVAS.0, CANVAS.1, pacer)?;
        let mut builder = Session::<PixmapRenderer>::builder(self.config.clone())
            .clock(Arc::clone(&clock))
            .device(Box::new(participant), device_mode);
        let mut sent = None;
        if self.options.tracker {
            let tracker = SimulatedTracker::new(Arc::clone(&clock))
                .with_offset(TRACKER_OFFSET)
                .with_latency(Duration::from_micros(400))
                .with_echo_jitter(Duration::from_micros(200), self.options.seed);
            sent = Some(tracker.sent_log());
            builder = builder.tracker(Box::new(tracker), tracker_mode);
        }
        let mut session = builder.build(renderer)?;

        let mut rng = StdRng::seed_from_u64(self.options.seed);
        let mut report = Report {
            seed: self.options.seed,
            ..Report::default()
        };
        let mut phase = SessionPhase::default();
        loop {
            info!(?phase, "phase");
            match phase {
                SessionPhase::Welcome => {
                    if !session.tracker_connected() && self.options.tracker {
                        warn!("running without eyetracker");
                    }
                }
                SessionPhase::Calibration => {
                    report.calibration = Some(session.calibrate_frames(CALIBRATION_FRAMES));
                }
                SessionPhase::Practice | SessionPhase::Experiment => {
                    let mut trials = paradigm::phase_trials(&self.config.paradigm, phase, &mut rng)?;
                    let results = session.run_all(&mut trials);
                    let stop = ended_session(&results);
                    if phase.is_practice() {
                        report.practice = results;
                    } else {
                        report.experiment = results;
                    }
                    if stop {
                        warn!(?phase, "session ended early");
                        break;
                    }
                }
                SessionPhase::Debrief => {}
            }
            match phase.next() {
                Some(next) => phase = next,
                None => break,
            }
        }

        report.summary = Summary::of(&report.experiment, "response");
        if let Some(estimate) = session.tracker_estimate() {
            info!(?estimate, "final clock sync");
        }
        let renderer = session.close();
        info!(
            frames = renderer.frames(),
            trials = report.experiment.len(),
            accuracy = ?report.summary.accuracy,
            mean_rt_ms = ?report.summary.mean_rt_ms,
            "session finished"
        );
        if let Some(log) = &sent {
            report.tracker_markers = log.lock().len();
        }
        Ok(report)
    }

    pub fn json(&self) -> bool {
        self.options.json
    }
}

pub fn print_report(report: &Report) {
    let s = &report.summary;
    println!("=== SESSION SUMMARY (seed {}) ===", report.seed);
    if let Some(c) = &report.calibration {
        println!(
            "display: {:.1} Hz, jitter {:.1} us",
            c.effective_fps,
            c.jitter_ns / 1e3
        );
    }
    println!("practice trials:   {}", report.practice.len());
    println!(
        "experiment trials: {} ({} completed, {} skipped, {} faulted)",
        s.trials, s.completed, s.skipped, s.faulted
    );
    match (s.accuracy, s.mean_rt_ms) {
        (Some(acc), Some(rt)) => println!("accuracy {:.1}%, mean RT {:.1} ms", acc * 100.0, rt),
        (Some(acc), None) => println!("accuracy {:.1}%, no responses", acc * 100.0),
        _ => println!("no scored responses"),
    }
    println!("deadline misses:   {}", s.deadline_misses);
    if s.events_dropped > 0 {
        println!("events dropped:    {}", s.events_dropped);
    }
    if report.tracker_markers > 0 {
        println!("tracker markers:   {}", report.tracker_markers);
    }
}
