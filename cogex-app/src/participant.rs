use cogex_core::{Clock, DeviceId, DeviceKind, Timestamp};
use cogex_devices::{DeviceError, DeviceSource, RawInput, RawSignal};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;

const HOLD: Duration = Duration::from_millis(80);

/// Keyboard stand-in for a participant who presses the response key at
/// random intervals, without looking at the screen.
///
/// Presses are reported with their scheduled time as the hardware stamp, so
/// the sequence only depends on the seed.
pub struct SimulatedParticipant {
    id: DeviceId,
    key: String,
    clock: Arc<dyn Clock>,
    rng: StdRng,
    gap_ms: (u64, u64),
    next_press: Option<Timestamp>,
    release: Option<Timestamp>,
}

impl SimulatedParticipant {
    pub fn new(id: &str, key: &str, clock: Arc<dyn Clock>, seed: u64) -> Self {
        Self {
            id: DeviceId::new(id),
            key: key.to_string(),
            clock,
            rng: StdRng::seed_from_u64(seed),
            gap_ms: (250, 1800),
            next_press: None,
            release: None,
        }
    }

    pub fn with_gap(mut self, min: Duration, max: Duration) -> Self {
        let lo = (min.max(HOLD * 2).as_millis()) as u64;
        self.gap_ms = (lo, (max.as_millis() as u64).max(lo));
        self
    }

    fn gap(&mut self) -> Duration {
        Duration::from_millis(self.rng.random_range(self.gap_ms.0..=self.gap_ms.1))
    }

    fn key(&self, down: bool) -> RawSignal {
        RawSignal::Key {
            name: self.key.clone(),
            down,
        }
    }
}

impl DeviceSource for SimulatedParticipant {
    fn id(&self) -> &DeviceId {
        &self.id
    }

    fn kind(&self) -> DeviceKind {
        DeviceKind::Keyboard
    }

    fn poll(&mut self) -> Result<Vec<RawInput>, DeviceError> {
        let now = self.clock.now();
        let mut out = Vec::new();
        let mut next = match self.next_press {
            Some(t) => t,
            None => now + self.gap(),
        };
        loop {
            if let Some(up) = self.release.filter(|t| *t <= now) {
                out.push(RawInput::observed(self.key(false), up));
                self.release = None;
            }
            if next > now {
                break;
            }
            out.push(RawInput::observed(self.key(true), next));
            self.release = Some(next + HOLD);
            next = next + self.gap();
        }
        self.next_press = Some(next);
        Ok(out)
    }
}
