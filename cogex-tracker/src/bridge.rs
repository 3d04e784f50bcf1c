use crate::config::TrackerConfig;
use crate::link::{
    LinkError, RawTrackerEvent, RawTrackerKind, TrackerLink, decode_marker_echo, encode_marker,
};
use crate::sync::{ClockSync, SyncEstimate};
use cogex_core::{
    BusEvent, BusProducer, BusRegistrar, Clock, EyetrackerEvent, FixationPhase, LinkEvent,
    LinkStatus, PollMode, SyncMarker, Timestamp, TrackerEventKind, TrackerTime,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

struct LinkShared {
    link: Mutex<Box<dyn TrackerLink>>,
    connected: AtomicBool,
    next_seq: AtomicU64,
    pending: Mutex<HashMap<u64, SyncMarker>>,
    markers_failed: AtomicU64,
    estimate: Mutex<Option<SyncEstimate>>,
}

impl LinkShared {
    fn mark_disconnected(&self) {
        if self.connected.swap(false, Ordering::AcqRel) {
            tracing::warn!("tracker link disconnected");
        }
    }
}

/// Thread-safe handle for sending sync markers from the presentation thread.
#[derive(Clone)]
pub struct MarkerSender {
    shared: Arc<LinkShared>,
    clock: Arc<dyn Clock>,
}

impl MarkerSender {
    /// Stamps and sends a marker. After disconnect this fails without
    /// touching the link.
    pub fn send(&self, label: &str) -> Result<SyncMarker, LinkError> {
        if !self.shared.connected.load(Ordering::Acquire) {
            self.shared.markers_failed.fetch_add(1, Ordering::Relaxed);
            return Err(LinkError::Disconnected);
        }
        let mut link = self.shared.link.lock();
        let seq = self.shared.next_seq.fetch_add(1, Ordering::Relaxed);
        // Stamped under the lock, immediately before the write.
        let local = self.clock.now();
        let text = encode_marker(seq, local, label);
        match link.send(text.as_bytes()) {
            Ok(()) => {
                drop(link);
                let marker = SyncMarker::new(seq, label, local);
                self.shared.pending.lock().insert(seq, marker.clone());
                tracing::trace!(seq, %label, %local, "sync marker sent");
                Ok(marker)
            }
            Err(err) => {
                drop(link);
                self.shared.markers_failed.fetch_add(1, Ordering::Relaxed);
                if err == LinkError::Disconnected {
                    self.shared.mark_disconnected();
                }
                tracing::warn!(%label, error = %err, "sync marker send failed");
                Err(err)
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    pub fn markers_failed(&self) -> u64 {
        self.shared.markers_failed.load(Ordering::Relaxed)
    }
}

/// Receive side of the bridge: reads the link, maintains the clock fit and
/// publishes translated events.
pub struct TrackerPump {
    shared: Arc<LinkShared>,
    clock: Arc<dyn Clock>,
    producer: BusProducer,
    sync: ClockSync,
    max_stddev: Duration,
    last_ts: Timestamp,
    degraded: bool,
    announced_disconnect: bool,
}

impl TrackerPump {
    /// Processes everything the link has buffered. Returns the number of
    /// events published, or `None` once the link is gone.
    pub fn pump_once(&mut self) -> Option<usize> {
        if self.announced_disconnect {
            return None;
        }
        if !self.shared.connected.load(Ordering::Acquire) {
            self.announce_disconnect();
            return None;
        }
        let received = self.shared.link.lock().receive();
        let raw = match received {
            Ok(raw) => raw,
            Err(LinkError::Malformed(msg)) => {
                tracing::warn!(%msg, "discarding malformed tracker packet");
                return Some(0);
            }
            Err(err) => {
                tracing::warn!(error = %err, "tracker receive failed");
                self.shared.mark_disconnected();
                self.announce_disconnect();
                return None;
            }
        };
        let mut published = 0;
        for ev in raw {
            published += self.handle(ev);
        }
        Some(published)
    }

    fn handle(&mut self, ev: RawTrackerEvent) -> usize {
        let kind = match ev.kind {
            RawTrackerKind::Message(text) => return self.handle_message(&text, ev.time),
            RawTrackerKind::Sample { eye, point } => TrackerEventKind::Gaze { eye, point },
            RawTrackerKind::FixationStart { eye, point } => TrackerEventKind::Fixation {
                eye,
                phase: FixationPhase::Start,
                point,
                started: self.sync.translate(ev.time),
            },
            RawTrackerKind::FixationUpdate { eye, average, start } => TrackerEventKind::Fixation {
                eye,
                phase: FixationPhase::Update,
                point: average,
                started: self.sync.translate(start),
            },
            RawTrackerKind::FixationEnd { eye, average, start } => TrackerEventKind::Fixation {
                eye,
                phase: FixationPhase::End,
                point: average,
                started: self.sync.translate(start),
            },
            RawTrackerKind::Saccade { eye, from, to } => TrackerEventKind::Saccade { eye, from, to },
            RawTrackerKind::Blink { eye } => TrackerEventKind::Blink { eye },
        };
        let ts = self.lane_time(self.sync.translate(ev.time));
        self.producer
            .push(BusEvent::Tracker(EyetrackerEvent::new(kind, ev.time, ts)));
        1
    }

    fn handle_message(&mut self, text: &str, time: TrackerTime) -> usize {
        let Some((seq, _, _)) = decode_marker_echo(text) else {
            tracing::trace!(%text, "ignoring tracker message");
            return 0;
        };
        let Some(marker) = self.shared.pending.lock().remove(&seq) else {
            tracing::debug!(seq, "echo for unknown marker");
            return 0;
        };
        let est = self.sync.observe(marker.local, time);
        *self.shared.estimate.lock() = Some(est);
        tracing::trace!(seq, offset_ns = est.offset_ns, slope = est.slope, "clock fit updated");

        let mut published = 0;
        let ts = self.lane_time(self.sync.translate(time));
        self.producer.push(BusEvent::Tracker(EyetrackerEvent::new(
            TrackerEventKind::MessageAck {
                seq,
                label: marker.label,
            },
            time,
            ts,
        )));
        published += 1;

        let degraded = est.offset_stddev > self.max_stddev;
        if degraded != self.degraded {
            self.degraded = degraded;
            let status = if degraded {
                tracing::warn!(stddev = ?est.offset_stddev, bound = ?self.max_stddev, "tracker sync degraded");
                LinkStatus::SyncDegraded {
                    offset_stddev: est.offset_stddev,
                }
            } else {
                tracing::info!(stddev = ?est.offset_stddev, "tracker sync restored");
                LinkStatus::SyncRestored
            };
            self.push_status(status);
            published += 1;
        }
        published
    }

    fn announce_disconnect(&mut self) {
        if self.announced_disconnect {
            return;
        }
        self.announced_disconnect = true;
        self.push_status(LinkStatus::Disconnected);
    }

    fn push_status(&mut self, status: LinkStatus) {
        let ts = self.lane_time(self.clock.now());
        self.producer
            .push(BusEvent::Link(LinkEvent { status, timestamp: ts }));
    }

    fn lane_time(&mut self, ts: Timestamp) -> Timestamp {
        let ts = ts.max(self.last_ts);
        self.last_ts = ts;
        ts
    }
}

enum PumpDriver {
    Inline(TrackerPump),
    Thread {
        stop: Arc<AtomicBool>,
        handle: JoinHandle<TrackerPump>,
    },
    Stopped,
}

/// Connection to one eyetracker.
pub struct TrackerBridge {
    sender: MarkerSender,
    driver: PumpDriver,
}

impl TrackerBridge {
    /// Sends the configured setup commands and starts receiving.
    pub fn connect(
        mut link: Box<dyn TrackerLink>,
        clock: Arc<dyn Clock>,
        registrar: &BusRegistrar,
        config: &TrackerConfig,
        mode: PollMode,
    ) -> Result<Self, LinkError> {
        for command in &config.setup_commands {
            link.send(command.as_bytes())?;
        }
        tracing::info!(
            commands = config.setup_commands.len(),
            clock = clock.description(),
            "tracker connected"
        );

        let shared = Arc::new(LinkShared {
            link: Mutex::new(link),
            connected: AtomicBool::new(true),
            next_seq: AtomicU64::new(0),
            pending: Mutex::new(HashMap::new()),
            markers_failed: AtomicU64::new(0),
            estimate: Mutex::new(None),
        });
        let pump = TrackerPump {
            shared: Arc::clone(&shared),
            clock: Arc::clone(&clock),
            producer: registrar.register("tracker"),
            sync: ClockSync::new(
                config.sync_window,
                config.tracker_tick_ns,
                clock.epoch_offset(),
            ),
            max_stddev: config.max_offset_stddev(),
            last_ts: Timestamp::ZERO,
            degraded: false,
            announced_disconnect: false,
        };
        let driver = match mode {
            PollMode::Inline => PumpDriver::Inline(pump),
            PollMode::Thread { interval } => {
                let stop = Arc::new(AtomicBool::new(false));
                let handle = spawn_pump(pump, interval, Arc::clone(&stop))
                    .map_err(|e| LinkError::Io(e.to_string()))?;
                PumpDriver::Thread { stop, handle }
            }
        };
        Ok(Self {
            sender: MarkerSender { shared, clock },
            driver,
        })
    }

    pub fn marker_sender(&self) -> MarkerSender {
        self.sender.clone()
    }

    pub fn send_marker(&self, label: &str) -> Result<SyncMarker, LinkError> {
        self.sender.send(label)
    }

    /// Pumps the link once when running inline; no-op for a threaded pump.
    pub fn pump_inline(&mut self) -> usize {
        match &mut self.driver {
            PumpDriver::Inline(pump) => pump.pump_once().unwrap_or(0),
            _ => 0,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.sender.is_connected()
    }

    pub fn estimate(&self) -> Option<SyncEstimate> {
        *self.sender.shared.estimate.lock()
    }

    pub fn markers_failed(&self) -> u64 {
        self.sender.markers_failed()
    }

    /// Stops the receive side. Pending markers are discarded.
    pub fn shutdown(&mut self) {
        match std::mem::replace(&mut self.driver, PumpDriver::Stopped) {
            PumpDriver::Thread { stop, handle } => {
                stop.store(true, Ordering::Release);
                if handle.join().is_err() {
                    tracing::error!("tracker pump thread panicked");
                }
            }
            PumpDriver::Inline(_) | PumpDriver::Stopped => {}
        }
    }
}

impl Drop for TrackerBridge {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn spawn_pump(
    mut pump: TrackerPump,
    interval: Duration,
    stop: Arc<AtomicBool>,
) -> std::io::Result<JoinHandle<TrackerPump>> {
    thread::Builder::new()
        .name("cogex-tracker".into())
        .spawn(move || {
            while !stop.load(Ordering::Acquire) {
                if pump.pump_once().is_none() {
                    break;
                }
                cogex_timing::precise_sleep(interval);
            }
            pump
        })
}
