use cogex_core::Eye;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub poll_interval_us: u64,
    /// Marker round-trips kept for the clock fit.
    pub sync_window: usize,
    /// Residual standard deviation above which sync is reported degraded.
    pub max_offset_stddev_us: u64,
    /// Length of one tracker clock tick.
    pub tracker_tick_ns: u64,
    /// Eye used for gaze-contingent predicates when both are recorded.
    pub eye_used: Eye,
    /// Sent verbatim, in order, right after connecting.
    pub setup_commands: Vec<String>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            poll_interval_us: 1000,
            sync_window: 32,
            max_offset_stddev_us: 1000,
            tracker_tick_ns: 1,
            eye_used: Eye::Right,
            setup_commands: default_setup_commands(),
        }
    }
}

impl TrackerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_micros(self.poll_interval_us)
    }

    pub fn max_offset_stddev(&self) -> Duration {
        Duration::from_micros(self.max_offset_stddev_us)
    }
}

fn default_setup_commands() -> Vec<String> {
    [
        "file_event_filter = LEFT,RIGHT,FIXATION,SACCADE,BLINK,MESSAGE,BUTTON",
        "file_event_data = GAZE,GAZERES,AREA,VELOCITY,STATUS",
        "file_sample_data = LEFT,RIGHT,GAZE,AREA,GAZERES,STATUS",
        "link_event_filter = LEFT,RIGHT,FIXATION,FIXUPDATE",
        "link_event_data = GAZE,STATUS",
        "link_sample_data = LEFT,RIGHT,GAZE,GAZERES,AREA,STATUS",
        "recording_parse_type = GAZE",
        "saccade_velocity_threshold = 30",
        "saccade_acceleration_threshold = 8000",
        "saccade_motion_threshold = 0.15",
        "saccade_pursuit_fixup = 60",
        "fixation_update_interval = 0",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}
