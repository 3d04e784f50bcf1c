use crate::link::{LinkError, RawTrackerEvent, RawTrackerKind, TrackerLink};
use cogex_core::{Clock, Eye, GazePoint, Timestamp, TrackerTime};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// In-process tracker for simulation and tests.
///
/// Its clock runs at `offset + local * (1 + drift)`. Markers are echoed back
/// stamped with the tracker time at which they arrived (send time plus
/// latency, per-echo delay and jitter). Scripted gaze becomes visible once
/// the local clock passes it.
pub struct SimulatedTracker {
    clock: Arc<dyn Clock>,
    offset: Duration,
    drift_ppm: f64,
    latency: Duration,
    echo_delays: VecDeque<Duration>,
    jitter: Option<(Duration, StdRng)>,
    script: VecDeque<(Timestamp, RawTrackerKind)>,
    echoes: Vec<RawTrackerEvent>,
    sent: Arc<Mutex<Vec<String>>>,
    disconnect_at: Option<Timestamp>,
}

impl SimulatedTracker {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            offset: Duration::ZERO,
            drift_ppm: 0.0,
            latency: Duration::ZERO,
            echo_delays: VecDeque::new(),
            jitter: None,
            script: VecDeque::new(),
            echoes: Vec::new(),
            sent: Arc::new(Mutex::new(Vec::new())),
            disconnect_at: None,
        }
    }

    pub fn with_offset(mut self, offset: Duration) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_drift_ppm(mut self, ppm: f64) -> Self {
        self.drift_ppm = ppm;
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Extra delay for the next echoes, consumed one per marker.
    pub fn with_echo_delays(mut self, delays: impl IntoIterator<Item = Duration>) -> Self {
        self.echo_delays.extend(delays);
        self
    }

    /// Uniform random extra delay in `[0, max]` for every echo.
    pub fn with_echo_jitter(mut self, max: Duration, seed: u64) -> Self {
        self.jitter = Some((max, StdRng::seed_from_u64(seed)));
        self
    }

    pub fn disconnect_at(mut self, ts: Timestamp) -> Self {
        self.disconnect_at = Some(ts);
        self
    }

    pub fn gaze_at(self, at: Timestamp, eye: Eye, point: GazePoint) -> Self {
        self.script_event(at, RawTrackerKind::Sample { eye, point })
    }

    /// A fixation from `start` to `end`, with gaze samples every `sample_interval`.
    pub fn fixation(
        mut self,
        start: Timestamp,
        end: Timestamp,
        eye: Eye,
        point: GazePoint,
        sample_interval: Duration,
    ) -> Self {
        let start_time = self.tracker_time(start);
        self = self.script_event(start, RawTrackerKind::FixationStart { eye, point });
        if !sample_interval.is_zero() {
            let mut t = start + sample_interval;
            while t < end {
                self = self.script_event(t, RawTrackerKind::Sample { eye, point });
                t = t + sample_interval;
            }
        }
        self.script_event(
            end,
            RawTrackerKind::FixationEnd {
                eye,
                average: point,
                start: start_time,
            },
        )
    }

    pub fn script_event(mut self, at: Timestamp, kind: RawTrackerKind) -> Self {
        let pos = self.script.partition_point(|(t, _)| *t <= at);
        self.script.insert(pos, (at, kind));
        self
    }

    /// Everything written to the link, in order.
    pub fn sent_log(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.sent)
    }

    pub fn tracker_time(&self, local: Timestamp) -> TrackerTime {
        let scaled = local.as_nanos() as f64 * (1.0 + self.drift_ppm * 1e-6);
        TrackerTime(self.offset.as_nanos() as u64 + scaled.round() as u64)
    }

    fn check_link(&self) -> Result<(), LinkError> {
        match self.disconnect_at {
            Some(at) if self.clock.now() >= at => Err(LinkError::Disconnected),
            _ => Ok(()),
        }
    }

    fn echo_delay(&mut self) -> Duration {
        let mut delay = self.latency + self.echo_delays.pop_front().unwrap_or_default();
        if let Some((max, rng)) = &mut self.jitter {
            let extra = rng.random_range(0..=max.as_nanos() as u64);
            delay += Duration::from_nanos(extra);
        }
        delay
    }
}

impl TrackerLink for SimulatedTracker {
    fn send(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        self.check_link()?;
        let text = std::str::from_utf8(bytes)
            .map_err(|e| LinkError::Malformed(e.to_string()))?
            .to_string();
        if text.starts_with("MSG ") {
            let arrived = self.clock.now() + self.echo_delay();
            self.echoes.push(RawTrackerEvent {
                time: self.tracker_time(arrived),
                kind: RawTrackerKind::Message(text.clone()),
            });
        }
        self.sent.lock().push(text);
        Ok(())
    }

    fn receive(&mut self) -> Result<Vec<RawTrackerEvent>, LinkError> {
        self.check_link()?;
        let now = self.clock.now();
        let mut out = std::mem::take(&mut self.echoes);
        while self.script.front().is_some_and(|(t, _)| *t <= now) {
            if let Some((at, kind)) = self.script.pop_front() {
                out.push(RawTrackerEvent {
                    time: self.tracker_time(at),
                    kind,
                });
            }
        }
        out.sort_by_key(|ev| ev.time);
        Ok(out)
    }
}
