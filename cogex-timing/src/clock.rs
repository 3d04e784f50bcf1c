use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Coarsest resolution the presentation core accepts from a time source.
pub const MAX_RESOLUTION: Duration = Duration::from_millis(1);

/// Clock ticks (nanoseconds) since the clock's epoch.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);

    pub const fn from_nanos(ns: u64) -> Self {
        Timestamp(ns)
    }

    pub const fn from_millis(ms: u64) -> Self {
        Timestamp(ms * 1_000_000)
    }

    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    pub fn as_millis_f64(self) -> f64 {
        self.0 as f64 / 1_000_000.0
    }

    /// Time elapsed since `earlier`, zero if `earlier` is in the future.
    pub fn saturating_since(self, earlier: Timestamp) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(earlier.0))
    }
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Duration) -> Timestamp {
        let ns = u64::try_from(rhs.as_nanos()).unwrap_or(u64::MAX);
        Timestamp(self.0.saturating_add(ns))
    }
}

impl Sub<Duration> for Timestamp {
    type Output = Timestamp;

    fn sub(self, rhs: Duration) -> Timestamp {
        let ns = u64::try_from(rhs.as_nanos()).unwrap_or(u64::MAX);
        Timestamp(self.0.saturating_sub(ns))
    }
}

impl Sub for Timestamp {
    type Output = Duration;

    fn sub(self, rhs: Timestamp) -> Duration {
        self.saturating_since(rhs)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}ms", self.as_millis_f64())
    }
}

/// Host monotonic counter reading (ns) at the clock's epoch.
///
/// `host = epoch + local`. The eyetracker bridge uses this as its prior
/// mapping until the first marker round-trip has been observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EpochOffset(i64);

impl EpochOffset {
    pub const fn from_nanos(ns: i64) -> Self {
        EpochOffset(ns)
    }

    pub const fn as_nanos(self) -> i64 {
        self.0
    }

    pub fn to_host(self, ts: Timestamp) -> i64 {
        self.0.saturating_add(ts.as_nanos() as i64)
    }

    /// Local timestamp for a host counter value; `None` if it predates the epoch.
    pub fn from_host(self, host_ns: i64) -> Option<Timestamp> {
        let local = host_ns.checked_sub(self.0)?;
        u64::try_from(local).ok().map(Timestamp::from_nanos)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClockError {
    #[error("monotonic clock unavailable: {0}")]
    Unavailable(String),
}

/// Passive, process-wide time reference.
///
/// `now` must be wait-free and monotonic; it is read on the presentation
/// thread every tick and on every producer thread for every event.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;

    fn epoch_offset(&self) -> EpochOffset;

    fn resolution(&self) -> Duration;

    fn description(&self) -> &str;
}

/// Clock backed by the OS monotonic counter.
#[derive(Debug)]
pub struct MonotonicClock {
    start: Instant,
    epoch: EpochOffset,
    resolution: Duration,
}

impl MonotonicClock {
    pub fn new() -> Result<Self, ClockError> {
        let resolution = probe_resolution()?;
        if resolution > MAX_RESOLUTION {
            return Err(ClockError::Unavailable(format!(
                "resolution {resolution:?} is coarser than {MAX_RESOLUTION:?}"
            )));
        }
        let host = host_monotonic_ns()?;
        let start = Instant::now();
        Ok(Self {
            start,
            epoch: EpochOffset(host),
            resolution,
        })
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Timestamp {
        Timestamp(self.start.elapsed().as_nanos() as u64)
    }

    fn epoch_offset(&self) -> EpochOffset {
        self.epoch
    }

    fn resolution(&self) -> Duration {
        self.resolution
    }

    fn description(&self) -> &str {
        "Monotonic Clock"
    }
}

#[cfg(target_os = "linux")]
fn probe_resolution() -> Result<Duration, ClockError> {
    let mut res = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    let rc = unsafe { libc::clock_getres(libc::CLOCK_MONOTONIC, &mut res) };
    if rc != 0 {
        return Err(ClockError::Unavailable(
            std::io::Error::last_os_error().to_string(),
        ));
    }
    Ok(Duration::new(res.tv_sec as u64, res.tv_nsec as u32))
}

#[cfg(not(target_os = "linux"))]
fn probe_resolution() -> Result<Duration, ClockError> {
    // Smallest observable step of Instant over a bounded number of reads.
    let mut best = Duration::MAX;
    let mut last = Instant::now();
    for _ in 0..10_000 {
        let now = Instant::now();
        let step = now.duration_since(last);
        if !step.is_zero() {
            best = best.min(step);
            if best <= Duration::from_micros(1) {
                break;
            }
        }
        last = now;
    }
    if best == Duration::MAX {
        return Err(ClockError::Unavailable("Instant never advanced".into()));
    }
    Ok(best)
}

#[cfg(target_os = "linux")]
fn host_monotonic_ns() -> Result<i64, ClockError> {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    let rc = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    if rc != 0 {
        return Err(ClockError::Unavailable(
            std::io::Error::last_os_error().to_string(),
        ));
    }
    Ok(ts.tv_sec as i64 * 1_000_000_000 + ts.tv_nsec as i64)
}

#[cfg(not(target_os = "linux"))]
fn host_monotonic_ns() -> Result<i64, ClockError> {
    Ok(0)
}

/// Manually driven clock shared between clones.
///
/// Used for deterministic runs: the renderer advances it one frame interval
/// per tick and scripted producers read it.
#[derive(Debug, Clone, Default)]
pub struct SimClock {
    nanos: Arc<AtomicU64>,
}

impl SimClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(ts: Timestamp) -> Self {
        Self {
            nanos: Arc::new(AtomicU64::new(ts.as_nanos())),
        }
    }

    /// Moves time forward and returns the new reading.
    pub fn advance(&self, d: Duration) -> Timestamp {
        let step = u64::try_from(d.as_nanos()).unwrap_or(u64::MAX);
        let prev = self.nanos.fetch_add(step, Ordering::AcqRel);
        Timestamp(prev.saturating_add(step))
    }

    /// Jumps to `ts`; never moves time backwards.
    pub fn set(&self, ts: Timestamp) -> Timestamp {
        let prev = self.nanos.fetch_max(ts.as_nanos(), Ordering::AcqRel);
        Timestamp(prev.max(ts.as_nanos()))
    }
}

impl Clock for SimClock {
    fn now(&self) -> Timestamp {
        Timestamp(self.nanos.load(Ordering::Acquire))
    }

    fn epoch_offset(&self) -> EpochOffset {
        EpochOffset(0)
    }

    fn resolution(&self) -> Duration {
        Duration::from_nanos(1)
    }

    fn description(&self) -> &str {
        "Simulated Clock"
    }
}
