use cogex_core::{Timestamp, TrackerTime};
use cogex_timing::EpochOffset;
use std::collections::VecDeque;
use std::time::Duration;

/// Current tracker-to-local mapping: `local = offset + slope * tracker`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncEstimate {
    pub slope: f64,
    pub offset_ns: f64,
    /// Residual standard deviation of the fit.
    pub offset_stddev: Duration,
    pub pairs: usize,
}

/// Least-squares fit of local time against tracker time over the most
/// recent marker round-trips.
#[derive(Debug, Clone)]
pub struct ClockSync {
    window: usize,
    tick_ns: f64,
    prior: EpochOffset,
    // (tracker_ns, local_ns)
    pairs: VecDeque<(f64, f64)>,
    fit: Option<SyncEstimate>,
}

impl ClockSync {
    /// `prior` maps tracker time before the first round-trip, assuming the
    /// tracker counts on the host monotonic clock.
    pub fn new(window: usize, tick_ns: u64, prior: EpochOffset) -> Self {
        let window = window.max(1);
        Self {
            window,
            tick_ns: tick_ns.max(1) as f64,
            prior,
            pairs: VecDeque::with_capacity(window),
            fit: None,
        }
    }

    pub fn estimate(&self) -> Option<SyncEstimate> {
        self.fit
    }

    pub fn observe(&mut self, local: Timestamp, tracker: TrackerTime) -> SyncEstimate {
        if self.pairs.len() >= self.window {
            self.pairs.pop_front();
        }
        self.pairs
            .push_back((tracker.0 as f64 * self.tick_ns, local.as_nanos() as f64));
        let est = self.refit();
        self.fit = Some(est);
        est
    }

    pub fn translate(&self, tracker: TrackerTime) -> Timestamp {
        let x = tracker.0 as f64 * self.tick_ns;
        match self.fit {
            Some(fit) => {
                let local = fit.offset_ns + fit.slope * x;
                if local <= 0.0 {
                    Timestamp::ZERO
                } else {
                    Timestamp::from_nanos(local.round() as u64)
                }
            }
            None => self
                .prior
                .from_host(x.round() as i64)
                .unwrap_or(Timestamp::ZERO),
        }
    }

    fn refit(&self) -> SyncEstimate {
        let n = self.pairs.len();
        let nf = n as f64;
        let mean_x = self.pairs.iter().map(|(x, _)| x).sum::<f64>() / nf;
        let mean_y = self.pairs.iter().map(|(_, y)| y).sum::<f64>() / nf;

        let mut sxx = 0.0;
        let mut sxy = 0.0;
        for (x, y) in &self.pairs {
            let dx = x - mean_x;
            sxx += dx * dx;
            sxy += dx * (y - mean_y);
        }
        // A single pair (or identical tracker stamps) only pins the offset.
        let slope = if n < 2 || sxx <= f64::EPSILON {
            1.0
        } else {
            sxy / sxx
        };
        let offset_ns = mean_y - slope * mean_x;

        let stddev_ns = if n >= 3 {
            let ss: f64 = self
                .pairs
                .iter()
                .map(|(x, y)| {
                    let r = y - (offset_ns + slope * x);
                    r * r
                })
                .sum();
            (ss / (nf - 2.0)).sqrt()
        } else {
            0.0
        };

        SyncEstimate {
            slope,
            offset_ns,
            offset_stddev: Duration::from_nanos(stddev_ns.round() as u64),
            pairs: n,
        }
    }
}
