use crate::clock::{Clock, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;

/// Summary of recorded frame intervals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameStats {
    pub samples: usize,
    pub average_frame_time_ns: f64,
    pub jitter_ns: f64,
    pub min_frame_time_ns: f64,
    pub max_frame_time_ns: f64,
    pub effective_fps: f64,
}

/// Bounded window of frame intervals measured between successive ticks.
#[derive(Debug, Clone)]
pub struct FrameTimer {
    intervals: VecDeque<Duration>,
    max_samples: usize,
    last_tick: Option<Timestamp>,
}

impl FrameTimer {
    pub fn new(max_samples: usize) -> Self {
        let max_samples = max_samples.max(1);
        Self {
            intervals: VecDeque::with_capacity(max_samples),
            max_samples,
            last_tick: None,
        }
    }

    /// Records a tick and returns the interval since the previous one.
    pub fn record_tick(&mut self, ts: Timestamp) -> Option<Duration> {
        let interval = self.last_tick.map(|last| ts - last);
        self.last_tick = Some(ts);
        if let Some(d) = interval {
            self.record_frame(d);
        }
        interval
    }

    pub fn record_frame(&mut self, d: Duration) {
        if self.intervals.len() >= self.max_samples {
            self.intervals.pop_front();
        }
        self.intervals.push_back(d);
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn clear(&mut self) {
        self.intervals.clear();
        self.last_tick = None;
    }

    pub fn stats(&self) -> FrameStats {
        if self.intervals.is_empty() {
            return FrameStats::default();
        }
        let times: Vec<f64> = self
            .intervals
            .iter()
            .map(|d| d.as_nanos() as f64)
            .collect();
        let n = times.len() as f64;
        let avg = times.iter().sum::<f64>() / n;
        let var = times.iter().map(|x| (x - avg).powi(2)).sum::<f64>() / n;
        let min = times.iter().copied().fold(f64::INFINITY, f64::min);
        let max = times.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        FrameStats {
            samples: times.len(),
            average_frame_time_ns: avg,
            jitter_ns: var.sqrt(),
            min_frame_time_ns: min,
            max_frame_time_ns: max,
            effective_fps: if avg > 0.0 { 1e9 / avg } else { 0.0 },
        }
    }
}

impl Default for FrameTimer {
    fn default() -> Self {
        Self::new(1000)
    }
}

/// Sleeps until `target` on `clock`, waking early enough to spin out the rest.
pub fn sleep_until(clock: &dyn Clock, target: Timestamp) {
    const SPIN_WINDOW: Duration = Duration::from_micros(200);
    let now = clock.now();
    if target <= now {
        return;
    }
    let remaining = target - now;
    if remaining > SPIN_WINDOW {
        precise_sleep(remaining - SPIN_WINDOW);
    }
    while clock.now() < target {
        std::hint::spin_loop();
    }
}

pub fn precise_sleep(duration: Duration) {
    #[cfg(target_os = "linux")]
    linux_sleep(duration);
    #[cfg(target_os = "macos")]
    spin_sleep(duration);
    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    std::thread::sleep(duration);
}

#[cfg(target_os = "linux")]
fn linux_sleep(duration: Duration) {
    use libc::{clock_nanosleep, timespec, CLOCK_MONOTONIC, EINTR};

    let mut req = timespec {
        tv_sec: duration.as_secs() as libc::time_t,
        tv_nsec: duration.subsec_nanos() as libc::c_long,
    };
    let mut rem = timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    loop {
        let rc = unsafe { clock_nanosleep(CLOCK_MONOTONIC, 0, &req, &mut rem) };
        if rc != EINTR {
            break;
        }
        req = rem;
    }
}

#[cfg(target_os = "macos")]
fn spin_sleep(duration: Duration) {
    if duration < Duration::from_micros(100) {
        let start = std::time::Instant::now();
        while start.elapsed() < duration {
            std::hint::spin_loop();
        }
    } else {
        std::thread::sleep(duration);
    }
}
