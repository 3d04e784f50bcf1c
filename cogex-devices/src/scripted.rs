use crate::source::{DeviceError, DeviceSource, RawInput, RawSignal};
use cogex_core::{Clock, DeviceId, DeviceKind, Timestamp};
use std::collections::VecDeque;
use std::sync::Arc;

/// Replays a fixed timeline of raw inputs as the clock passes them.
///
/// Each input is reported with its scripted time as the hardware stamp, so
/// replays are independent of how often the device is polled.
pub struct ScriptedDevice {
    id: DeviceId,
    kind: DeviceKind,
    clock: Arc<dyn Clock>,
    timeline: VecDeque<(Timestamp, RawSignal)>,
    disconnect_at: Option<Timestamp>,
}

impl ScriptedDevice {
    pub fn new(id: impl Into<DeviceId>, kind: DeviceKind, clock: Arc<dyn Clock>) -> Self {
        Self {
            id: id.into(),
            kind,
            clock,
            timeline: VecDeque::new(),
            disconnect_at: None,
        }
    }

    pub fn at(mut self, ts: Timestamp, signal: RawSignal) -> Self {
        let pos = self.timeline.partition_point(|(t, _)| *t <= ts);
        self.timeline.insert(pos, (ts, signal));
        self
    }

    pub fn key_down(self, ts: Timestamp, name: &str) -> Self {
        self.at(
            ts,
            RawSignal::Key {
                name: name.to_string(),
                down: true,
            },
        )
    }

    pub fn key_up(self, ts: Timestamp, name: &str) -> Self {
        self.at(
            ts,
            RawSignal::Key {
                name: name.to_string(),
                down: false,
            },
        )
    }

    pub fn disconnect_at(mut self, ts: Timestamp) -> Self {
        self.disconnect_at = Some(ts);
        self
    }

    pub fn remaining(&self) -> usize {
        self.timeline.len()
    }
}

impl DeviceSource for ScriptedDevice {
    fn id(&self) -> &DeviceId {
        &self.id
    }

    fn kind(&self) -> DeviceKind {
        self.kind
    }

    fn poll(&mut self) -> Result<Vec<RawInput>, DeviceError> {
        let now = self.clock.now();
        let cutoff = match self.disconnect_at {
            Some(at) if at <= now => at,
            _ => now,
        };
        let mut out = Vec::new();
        while self.timeline.front().is_some_and(|(t, _)| *t <= cutoff) {
            if let Some((ts, signal)) = self.timeline.pop_front() {
                out.push(RawInput::observed(signal, ts));
            }
        }
        if out.is_empty() && self.disconnect_at.is_some_and(|at| at <= now) {
            return Err(DeviceError::Disconnected(self.id.clone()));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cogex_timing::SimClock;
    use std::time::Duration;

    #[test]
    fn releases_inputs_as_time_passes() {
        let clock = SimClock::new();
        let mut dev = ScriptedDevice::new("kbd", DeviceKind::Keyboard, Arc::new(clock.clone()))
            .key_up(Timestamp::from_millis(20), "a")
            .key_down(Timestamp::from_millis(10), "a");
        assert!(dev.poll().unwrap().is_empty());
        clock.advance(Duration::from_millis(15));
        let got = dev.poll().unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].observed_at, Some(Timestamp::from_millis(10)));
        clock.advance(Duration::from_millis(10));
        assert_eq!(dev.poll().unwrap().len(), 1);
        assert_eq!(dev.remaining(), 0);
    }

    #[test]
    fn delivers_backlog_before_disconnecting() {
        let clock = SimClock::new();
        let mut dev = ScriptedDevice::new("kbd", DeviceKind::Keyboard, Arc::new(clock.clone()))
            .key_down(Timestamp::from_millis(1), "a")
            .key_down(Timestamp::from_millis(8), "b")
            .disconnect_at(Timestamp::from_millis(5));
        clock.set(Timestamp::from_millis(10));
        assert_eq!(dev.poll().unwrap().len(), 1);
        assert!(matches!(dev.poll(), Err(DeviceError::Disconnected(_))));
    }
}
