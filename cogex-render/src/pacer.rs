use cogex_timing::{sleep_until, Clock, SimClock, Timestamp};
use std::sync::Arc;
use std::time::Duration;

/// Decides when a composed frame counts as flipped.
pub enum FramePacer {
    /// Sleeps on a real clock until the next refresh deadline. A frame that
    /// overruns its deadline re-anchors the schedule at the late flip.
    Realtime {
        clock: Arc<dyn Clock>,
        interval: Duration,
        next: Option<Timestamp>,
    },
    /// Advances a shared simulated clock by one interval per frame.
    Simulated { clock: SimClock, interval: Duration },
}

impl FramePacer {
    pub fn realtime(clock: Arc<dyn Clock>, interval: Duration) -> Self {
        FramePacer::Realtime {
            clock,
            interval,
            next: None,
        }
    }

    pub fn simulated(clock: SimClock, interval: Duration) -> Self {
        FramePacer::Simulated { clock, interval }
    }

    pub fn interval(&self) -> Duration {
        match self {
            FramePacer::Realtime { interval, .. } | FramePacer::Simulated { interval, .. } => {
                *interval
            }
        }
    }

    /// Blocks until the next frame boundary and returns its time.
    pub fn wait_frame(&mut self) -> Timestamp {
        match self {
            FramePacer::Realtime {
                clock,
                interval,
                next,
            } => {
                let now = clock.now();
                let target = match *next {
                    Some(t) if t >= now => t,
                    _ => now,
                };
                sleep_until(clock.as_ref(), target);
                let flipped = clock.now().max(target);
                *next = Some(flipped + *interval);
                flipped
            }
            FramePacer::Simulated { clock, interval } => clock.advance(*interval),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cogex_timing::MonotonicClock;

    #[test]
    fn simulated_frames_are_exact() {
        let clock = SimClock::new();
        let mut pacer = FramePacer::simulated(clock.clone(), Duration::from_millis(8));
        assert_eq!(pacer.wait_frame(), Timestamp::from_millis(8));
        assert_eq!(pacer.wait_frame(), Timestamp::from_millis(16));
        assert_eq!(clock.now(), Timestamp::from_millis(16));
    }

    #[test]
    fn realtime_frames_are_spaced_by_the_interval() {
        let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new().unwrap());
        let interval = Duration::from_millis(4);
        let mut pacer = FramePacer::realtime(clock, interval);
        let first = pacer.wait_frame();
        let second = pacer.wait_frame();
        let third = pacer.wait_frame();
        assert!(second - first >= interval);
        assert!(third - second >= interval);
    }
}
