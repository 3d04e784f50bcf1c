use crate::normalize::{Normalizer, NormalizerConfig};
use crate::source::{DeviceError, DeviceSource};
use cogex_core::{
    BusEvent, BusProducer, BusRegistrar, Clock, DeviceEvent, DeviceId, DeviceInput, PollMode,
    Timestamp,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollResult {
    /// Number of normalized events pushed.
    Delivered(usize),
    Lost,
}

/// One device wired to its own bus lane.
struct DeviceChannel {
    source: Box<dyn DeviceSource>,
    normalizer: Normalizer,
    producer: BusProducer,
    clock: Arc<dyn Clock>,
    last_ts: Timestamp,
    lost: bool,
}

impl DeviceChannel {
    fn poll_once(&mut self) -> PollResult {
        if self.lost {
            return PollResult::Lost;
        }
        match self.source.poll() {
            Ok(raw) => {
                let stamp = self.clock.now();
                let mut delivered = 0;
                for input in raw {
                    // Lane timestamps never go backwards even if hardware stamps do.
                    let ts = input.observed_at.unwrap_or(stamp).max(self.last_ts);
                    self.last_ts = ts;
                    for normalized in self.normalizer.normalize(input.signal) {
                        self.push(normalized, ts);
                        delivered += 1;
                    }
                }
                PollResult::Delivered(delivered)
            }
            Err(err) => {
                tracing::warn!(device = %self.source.id(), error = %err, "device poll failed");
                self.mark_lost();
                PollResult::Lost
            }
        }
    }

    fn mark_lost(&mut self) {
        if self.lost {
            return;
        }
        self.lost = true;
        let ts = self.clock.now().max(self.last_ts);
        self.last_ts = ts;
        self.push(DeviceInput::Lost, ts);
        tracing::warn!(device = %self.source.id(), "device lost");
    }

    fn push(&self, input: DeviceInput, ts: Timestamp) {
        let event = DeviceEvent::new(self.source.id().clone(), self.source.kind(), input, ts);
        self.producer.push(BusEvent::Device(event));
    }

    fn close(mut self) {
        self.mark_lost();
        self.source.close();
    }
}

struct Poller {
    id: DeviceId,
    stop: Arc<AtomicBool>,
    handle: JoinHandle<DeviceChannel>,
}

/// Owns every attached device and the threads polling them.
pub struct DeviceHub {
    clock: Arc<dyn Clock>,
    registrar: BusRegistrar,
    config: NormalizerConfig,
    inline: Vec<DeviceChannel>,
    pollers: Vec<Poller>,
}

impl DeviceHub {
    pub fn new(clock: Arc<dyn Clock>, registrar: BusRegistrar) -> Self {
        Self::with_config(clock, registrar, NormalizerConfig::default())
    }

    pub fn with_config(
        clock: Arc<dyn Clock>,
        registrar: BusRegistrar,
        config: NormalizerConfig,
    ) -> Self {
        Self {
            clock,
            registrar,
            config,
            inline: Vec::new(),
            pollers: Vec::new(),
        }
    }

    pub fn attach(
        &mut self,
        source: Box<dyn DeviceSource>,
        mode: PollMode,
    ) -> Result<(), DeviceError> {
        let id = source.id().clone();
        if self.is_attached(&id) {
            return Err(DeviceError::AlreadyAttached(id));
        }
        let channel = DeviceChannel {
            producer: self.registrar.register(format!("device:{id}")),
            normalizer: Normalizer::new(self.config.clone()),
            clock: Arc::clone(&self.clock),
            last_ts: Timestamp::ZERO,
            lost: false,
            source,
        };
        match mode {
            PollMode::Inline => {
                tracing::debug!(device = %id, "attached inline device");
                self.inline.push(channel);
            }
            PollMode::Thread { interval } => {
                let stop = Arc::new(AtomicBool::new(false));
                let handle = spawn_poller(channel, interval, Arc::clone(&stop))?;
                tracing::debug!(device = %id, ?interval, "attached polled device");
                self.pollers.push(Poller { id, stop, handle });
            }
        }
        Ok(())
    }

    /// Stops polling `id` and emits a final `DeviceLost` for it.
    pub fn detach(&mut self, id: &DeviceId) -> Result<(), DeviceError> {
        if let Some(pos) = self.inline.iter().position(|c| c.source.id() == id) {
            self.inline.remove(pos).close();
            return Ok(());
        }
        let pos = self
            .pollers
            .iter()
            .position(|p| &p.id == id)
            .ok_or_else(|| DeviceError::NotAttached(id.clone()))?;
        let poller = self.pollers.remove(pos);
        poller.stop.store(true, Ordering::Release);
        match poller.handle.join() {
            Ok(channel) => {
                channel.close();
                Ok(())
            }
            Err(_) => Err(DeviceError::PollerPanicked(poller.id)),
        }
    }

    /// Polls every inline device once. Called by the scheduler each tick.
    pub fn poll_inline(&mut self) -> usize {
        self.inline
            .iter_mut()
            .map(|c| match c.poll_once() {
                PollResult::Delivered(n) => n,
                PollResult::Lost => 0,
            })
            .sum()
    }

    pub fn is_attached(&self, id: &DeviceId) -> bool {
        self.inline.iter().any(|c| c.source.id() == id) || self.pollers.iter().any(|p| &p.id == id)
    }

    pub fn attached(&self) -> Vec<DeviceId> {
        self.inline
            .iter()
            .map(|c| c.source.id().clone())
            .chain(self.pollers.iter().map(|p| p.id.clone()))
            .collect()
    }

    pub fn has_inline(&self) -> bool {
        !self.inline.is_empty()
    }

    pub fn shutdown(&mut self) {
        for id in self.attached() {
            if let Err(err) = self.detach(&id) {
                tracing::warn!(device = %id, error = %err, "device detach failed");
            }
        }
    }
}

impl Drop for DeviceHub {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn spawn_poller(
    mut channel: DeviceChannel,
    interval: Duration,
    stop: Arc<AtomicBool>,
) -> Result<JoinHandle<DeviceChannel>, DeviceError> {
    let name = format!("cogex-device-{}", channel.source.id());
    let handle = thread::Builder::new().name(name).spawn(move || {
        while !stop.load(Ordering::Acquire) {
            if channel.poll_once() == PollResult::Lost {
                break;
            }
            cogex_timing::precise_sleep(interval);
        }
        channel
    })?;
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::ScriptedDevice;
    use crate::source::RawSignal;
    use cogex_core::{DeviceKind, EventBus};
    use cogex_timing::SimClock;

    fn hub(clock: &SimClock, bus: &EventBus) -> DeviceHub {
        DeviceHub::new(Arc::new(clock.clone()), bus.registrar())
    }

    #[test]
    fn inline_device_is_stamped_and_normalized() {
        let clock = SimClock::new();
        let mut bus = EventBus::new(64);
        let mut hub = hub(&clock, &bus);
        let dev = ScriptedDevice::new("kbd", DeviceKind::Keyboard, Arc::new(clock.clone()))
            .key_down(Timestamp::from_millis(5), "space")
            .key_down(Timestamp::from_millis(6), "space")
            .key_up(Timestamp::from_millis(9), "space");
        hub.attach(Box::new(dev), PollMode::Inline).unwrap();

        clock.set(Timestamp::from_millis(10));
        assert_eq!(hub.poll_inline(), 2);
        let events = bus.drain_until(clock.now());
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].timestamp(), Timestamp::from_millis(5));
        assert_eq!(events[1].timestamp(), Timestamp::from_millis(9));
    }

    #[test]
    fn poll_error_emits_single_lost_event() {
        let clock = SimClock::new();
        let mut bus = EventBus::new(64);
        let mut hub = hub(&clock, &bus);
        let dev = ScriptedDevice::new("pad", DeviceKind::Gamepad, Arc::new(clock.clone()))
            .disconnect_at(Timestamp::from_millis(3));
        hub.attach(Box::new(dev), PollMode::Inline).unwrap();

        clock.set(Timestamp::from_millis(4));
        hub.poll_inline();
        hub.poll_inline();
        let events = bus.drain_until(clock.now());
        assert_eq!(events.len(), 1);
        assert!(events[0].as_device().is_some_and(|e| e.is_lost()));
    }

    #[test]
    fn detach_emits_lost_and_forgets_device() {
        let clock = SimClock::new();
        let mut bus = EventBus::new(64);
        let mut hub = hub(&clock, &bus);
        let dev = ScriptedDevice::new("line", DeviceKind::Digital, Arc::new(clock.clone()));
        hub.attach(Box::new(dev), PollMode::Inline).unwrap();
        hub.detach(&DeviceId::new("line")).unwrap();
        assert!(hub.attached().is_empty());
        assert!(matches!(
            hub.detach(&DeviceId::new("line")),
            Err(DeviceError::NotAttached(_))
        ));
        let events = bus.drain_until(clock.now());
        assert!(events[0].as_device().is_some_and(|e| e.is_lost()));
    }

    #[test]
    fn duplicate_attach_is_rejected() {
        let clock = SimClock::new();
        let bus = EventBus::new(8);
        let mut hub = hub(&clock, &bus);
        let a = ScriptedDevice::new("kbd", DeviceKind::Keyboard, Arc::new(clock.clone()));
        let b = ScriptedDevice::new("kbd", DeviceKind::Keyboard, Arc::new(clock.clone()));
        hub.attach(Box::new(a), PollMode::Inline).unwrap();
        assert!(matches!(
            hub.attach(Box::new(b), PollMode::Inline),
            Err(DeviceError::AlreadyAttached(_))
        ));
    }

    #[test]
    fn threaded_poller_delivers_to_bus() {
        let clock = SimClock::starting_at(Timestamp::from_millis(1));
        let mut bus = EventBus::new(64);
        let mut hub = hub(&clock, &bus);
        let dev = ScriptedDevice::new("voice", DeviceKind::Voice, Arc::new(clock.clone()))
            .at(Timestamp::from_millis(1), RawSignal::Level(0.9));
        hub.attach(
            Box::new(dev),
            PollMode::Thread {
                interval: Duration::from_micros(200),
            },
        )
        .unwrap();

        let mut got = Vec::new();
        for _ in 0..500 {
            got.extend(bus.drain_until(clock.now()));
            if !got.is_empty() {
                break;
            }
            thread::sleep(Duration::from_millis(1));
        }
        hub.shutdown();
        assert!(matches!(
            got[0].as_device().map(|e| e.input()),
            Some(DeviceInput::VoiceOnset { .. })
        ));
    }
}
