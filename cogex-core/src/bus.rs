//! Multi-producer, single-consumer event bus.
//!
//! Each producer owns a bounded lane. The presentation thread merges the
//! lanes by timestamp when it drains, so producers never contend with each
//! other and never block on a full lane: the oldest event is evicted and
//! counted instead.

use crate::event::{BusEvent, Priority};
use cogex_timing::Timestamp;
use crossbeam_queue::ArrayQueue;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

pub const DEFAULT_CAPACITY: usize = 1024;

struct Lane {
    id: u64,
    name: String,
    queue: ArrayQueue<BusEvent>,
    dropped: AtomicU64,
    closed: AtomicBool,
}

struct BusShared {
    capacity: usize,
    lanes: Mutex<Vec<Arc<Lane>>>,
    next_id: AtomicU64,
    generation: AtomicU64,
    dropped: AtomicU64,
}

impl BusShared {
    fn record_drop(&self, lane: &Lane) {
        let lane_drops = lane.dropped.fetch_add(1, Ordering::Relaxed);
        self.dropped.fetch_add(1, Ordering::Relaxed);
        if lane_drops == 0 {
            tracing::warn!(lane = %lane.name, capacity = self.capacity, "bus lane overflowed, dropping oldest events");
        }
    }
}

/// Handle used to add producers to a bus after it has been created.
#[derive(Clone)]
pub struct BusRegistrar {
    shared: Arc<BusShared>,
}

impl BusRegistrar {
    pub fn register(&self, name: impl Into<String>) -> BusProducer {
        let name = name.into();
        let lane = Arc::new(Lane {
            id: self.shared.next_id.fetch_add(1, Ordering::Relaxed),
            name,
            queue: ArrayQueue::new(self.shared.capacity),
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        });
        self.shared.lanes.lock().push(Arc::clone(&lane));
        self.shared.generation.fetch_add(1, Ordering::Release);
        tracing::debug!(lane = %lane.name, id = lane.id, "registered bus producer");
        BusProducer {
            lane,
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Write end of one lane. Dropping it closes the lane; events already
/// pushed are still delivered.
pub struct BusProducer {
    lane: Arc<Lane>,
    shared: Arc<BusShared>,
}

impl BusProducer {
    /// Enqueues `event`. Returns `false` if an older event was evicted to make room.
    pub fn push(&self, event: BusEvent) -> bool {
        match self.lane.queue.force_push(event) {
            None => true,
            Some(_) => {
                self.shared.record_drop(&self.lane);
                false
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.lane.name
    }

    pub fn dropped(&self) -> u64 {
        self.lane.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for BusProducer {
    fn drop(&mut self) {
        self.lane.closed.store(true, Ordering::Release);
        self.shared.generation.fetch_add(1, Ordering::Release);
    }
}

struct LaneCursor {
    lane: Arc<Lane>,
    // Events pulled off the queue but not yet due.
    stash: VecDeque<BusEvent>,
}

/// Consumer end of the bus. Owned by the presentation thread.
pub struct EventBus {
    shared: Arc<BusShared>,
    cursors: Vec<LaneCursor>,
    seen_generation: u64,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            shared: Arc::new(BusShared {
                capacity,
                lanes: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(0),
                generation: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
            cursors: Vec::new(),
            seen_generation: u64::MAX,
        }
    }

    pub fn registrar(&self) -> BusRegistrar {
        BusRegistrar {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn register(&self, name: impl Into<String>) -> BusProducer {
        self.registrar().register(name)
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Total events evicted across all lanes since the bus was created.
    pub fn events_dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Number of registered lanes that have not been pruned.
    pub fn lanes(&self) -> usize {
        self.shared.lanes.lock().len()
    }

    /// All events with timestamp `<= now`, ordered by timestamp, then
    /// priority, then lane registration order.
    pub fn drain_until(&mut self, now: Timestamp) -> Vec<BusEvent> {
        let mut out = Vec::new();
        self.drain_into(now, &mut out);
        out
    }

    pub fn drain_into(&mut self, now: Timestamp, out: &mut Vec<BusEvent>) {
        self.refresh_lanes();
        let capacity = self.shared.capacity;

        let mut any_closed = false;
        for cursor in &mut self.cursors {
            // Loaded before popping so every push preceding the close is seen.
            any_closed |= cursor.lane.closed.load(Ordering::Acquire);
            while let Some(ev) = cursor.lane.queue.pop() {
                if cursor.stash.len() >= capacity {
                    cursor.stash.pop_front();
                    self.shared.record_drop(&cursor.lane);
                }
                cursor.stash.push_back(ev);
            }
        }

        loop {
            let mut best: Option<(usize, Timestamp, Priority)> = None;
            for (idx, cursor) in self.cursors.iter().enumerate() {
                let Some(head) = cursor.stash.front() else {
                    continue;
                };
                let ts = head.timestamp();
                if ts > now {
                    continue;
                }
                let prio = head.priority();
                let better = match best {
                    None => true,
                    Some((_, bts, bprio)) => (ts, prio) < (bts, bprio),
                };
                if better {
                    best = Some((idx, ts, prio));
                }
            }
            let Some((idx, _, _)) = best else {
                break;
            };
            if let Some(ev) = self.cursors[idx].stash.pop_front() {
                out.push(ev);
            }
        }

        if any_closed {
            self.prune_closed();
        }
    }

    /// Discards pending events stamped before `ts`.
    pub fn discard_before(&mut self, ts: Timestamp) -> usize {
        if ts == Timestamp::ZERO {
            return 0;
        }
        let mut stale = Vec::new();
        self.drain_into(Timestamp::from_nanos(ts.as_nanos() - 1), &mut stale);
        stale.len()
    }

    fn refresh_lanes(&mut self) {
        let generation = self.shared.generation.load(Ordering::Acquire);
        if generation == self.seen_generation {
            return;
        }
        self.seen_generation = generation;
        let lanes = self.shared.lanes.lock();
        for lane in lanes.iter() {
            if !self.cursors.iter().any(|c| c.lane.id == lane.id) {
                self.cursors.push(LaneCursor {
                    lane: Arc::clone(lane),
                    stash: VecDeque::new(),
                });
            }
        }
        self.cursors.sort_by_key(|c| c.lane.id);
    }

    fn prune_closed(&mut self) {
        let mut finished = Vec::new();
        self.cursors.retain(|c| {
            let done = c.lane.closed.load(Ordering::Acquire)
                && c.lane.queue.is_empty()
                && c.stash.is_empty();
            if done {
                finished.push(c.lane.id);
            }
            !done
        });
        if !finished.is_empty() {
            let mut lanes = self.shared.lanes.lock();
            lanes.retain(|lane| !finished.contains(&lane.id));
            tracing::debug!(remaining = lanes.len(), "pruned closed bus lanes");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{
        DeviceEvent, DeviceId, DeviceInput, DeviceKind, EyetrackerEvent, LinkEvent, LinkStatus,
        TrackerEventKind, TrackerTime,
    };

    fn key(name: &str, ms: u64) -> BusEvent {
        BusEvent::Device(DeviceEvent::new(
            DeviceId::new("kbd"),
            DeviceKind::Keyboard,
            DeviceInput::Key {
                name: name.into(),
                pressed: true,
            },
            Timestamp::from_millis(ms),
        ))
    }

    fn ack(seq: u64, ms: u64) -> BusEvent {
        BusEvent::Tracker(EyetrackerEvent::new(
            TrackerEventKind::MessageAck {
                seq,
                label: "m".into(),
            },
            TrackerTime(0),
            Timestamp::from_millis(ms),
        ))
    }

    #[test]
    fn merges_lanes_by_timestamp() {
        let mut bus = EventBus::new(16);
        let a = bus.register("a");
        let b = bus.register("b");
        a.push(key("a1", 1));
        a.push(key("a3", 3));
        b.push(key("b2", 2));
        b.push(key("b4", 4));

        let got: Vec<_> = bus
            .drain_until(Timestamp::from_millis(10))
            .iter()
            .map(|e| e.timestamp().as_nanos() / 1_000_000)
            .collect();
        assert_eq!(got, vec![1, 2, 3, 4]);
    }

    #[test]
    fn holds_back_future_events() {
        let mut bus = EventBus::new(16);
        let p = bus.register("p");
        p.push(key("now", 5));
        p.push(key("later", 20));
        assert_eq!(bus.drain_until(Timestamp::from_millis(10)).len(), 1);
        assert!(bus.drain_until(Timestamp::from_millis(10)).is_empty());
        assert_eq!(bus.drain_until(Timestamp::from_millis(20)).len(), 1);
    }

    #[test]
    fn equal_timestamps_break_ties_by_priority_then_lane() {
        let mut bus = EventBus::new(16);
        let devices = bus.register("devices");
        let tracker = bus.register("tracker");
        let link = bus.register("link");
        devices.push(key("k", 7));
        tracker.push(ack(1, 7));
        link.push(BusEvent::Link(LinkEvent {
            status: LinkStatus::SyncRestored,
            timestamp: Timestamp::from_millis(7),
        }));

        let got = bus.drain_until(Timestamp::from_millis(7));
        assert!(matches!(got[0], BusEvent::Tracker(_)));
        assert!(matches!(got[1], BusEvent::Link(_)));
        assert!(matches!(got[2], BusEvent::Device(_)));
    }

    #[test]
    fn overflow_evicts_oldest_and_counts() {
        let mut bus = EventBus::new(2);
        let p = bus.register("p");
        assert!(p.push(key("1", 1)));
        assert!(p.push(key("2", 2)));
        assert!(!p.push(key("3", 3)));
        assert_eq!(bus.events_dropped(), 1);
        assert_eq!(p.dropped(), 1);

        let got = bus.drain_until(Timestamp::from_millis(10));
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].timestamp(), Timestamp::from_millis(2));
    }

    #[test]
    fn closed_lanes_deliver_then_disappear() {
        let mut bus = EventBus::new(8);
        let p = bus.register("short-lived");
        p.push(key("x", 1));
        drop(p);
        assert_eq!(bus.drain_until(Timestamp::from_millis(1)).len(), 1);
        assert_eq!(bus.lanes(), 0);
    }

    #[test]
    fn late_registration_is_picked_up() {
        let mut bus = EventBus::new(8);
        assert!(bus.drain_until(Timestamp::from_millis(1)).is_empty());
        let p = bus.registrar().register("late");
        p.push(key("x", 1));
        assert_eq!(bus.drain_until(Timestamp::from_millis(1)).len(), 1);
    }

    #[test]
    fn producers_on_threads() {
        let mut bus = EventBus::new(256);
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let p = bus.register(format!("p{i}"));
                std::thread::spawn(move || {
                    for ms in 0..50u64 {
                        p.push(key("k", ms));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let got = bus.drain_until(Timestamp::from_millis(100));
        assert_eq!(got.len(), 200);
        assert!(got.windows(2).all(|w| w[0].timestamp() <= w[1].timestamp()));
        assert_eq!(bus.events_dropped(), 0);
    }
}
