use cogex_core::PollMode;
use cogex_devices::NormalizerConfig;
use cogex_tracker::TrackerConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parsing config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Timing of the standard reaction-time paradigm, in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParadigmConfig {
    pub practice_trials: usize,
    pub experiment_trials: usize,
    pub fixation_range_ms: (u64, u64),
    pub stimulus_duration_ms: u64,
    pub response_window_ms: u64,
    pub feedback_duration_ms: u64,
    pub inter_trial_interval_ms: u64,
    pub response_key: String,
    pub min_rt_ms: u64,
}

impl Default for ParadigmConfig {
    fn default() -> Self {
        Self {
            practice_trials: 20,
            experiment_trials: 100,
            fixation_range_ms: (500, 1500),
            stimulus_duration_ms: 200,
            response_window_ms: 2000,
            feedback_duration_ms: 500,
            inter_trial_interval_ms: 1000,
            response_key: "space".into(),
            min_rt_ms: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub refresh_rate_hz: f64,
    pub bus_capacity: usize,
    /// A tick longer than this many frame intervals counts as a deadline miss.
    pub deadline_miss_factor: f64,
    pub device_poll_interval_us: u64,
    pub tracker: TrackerConfig,
    pub normalizer: NormalizerConfig,
    pub paradigm: ParadigmConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            refresh_rate_hz: 120.0,
            bus_capacity: 1024,
            deadline_miss_factor: 1.5,
            device_poll_interval_us: 1000,
            tracker: TrackerConfig::default(),
            normalizer: NormalizerConfig::default(),
            paradigm: ParadigmConfig::default(),
        }
    }
}

impl SessionConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: SessionConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.refresh_rate_hz.is_finite() && self.refresh_rate_hz > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "refresh_rate_hz must be positive, got {}",
                self.refresh_rate_hz
            )));
        }
        if self.bus_capacity == 0 {
            return Err(ConfigError::Invalid("bus_capacity must be non-zero".into()));
        }
        if !(self.deadline_miss_factor >= 1.0) {
            return Err(ConfigError::Invalid(
                "deadline_miss_factor must be at least 1".into(),
            ));
        }
        if self.device_poll_interval_us == 0 || self.tracker.poll_interval_us == 0 {
            return Err(ConfigError::Invalid("poll intervals must be non-zero".into()));
        }
        if self.tracker.sync_window == 0 {
            return Err(ConfigError::Invalid("tracker.sync_window must be non-zero".into()));
        }
        let (lo, hi) = self.paradigm.fixation_range_ms;
        if lo > hi {
            return Err(ConfigError::Invalid(format!(
                "fixation range {lo}..{hi} is inverted"
            )));
        }
        if self.paradigm.min_rt_ms
            > self.paradigm.stimulus_duration_ms + self.paradigm.response_window_ms
        {
            return Err(ConfigError::Invalid(
                "min_rt_ms exceeds the response window".into(),
            ));
        }
        Ok(())
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.refresh_rate_hz)
    }

    pub fn device_poll_mode(&self) -> PollMode {
        PollMode::Thread {
            interval: Duration::from_micros(self.device_poll_interval_us),
        }
    }

    pub fn tracker_poll_mode(&self) -> PollMode {
        PollMode::Thread {
            interval: self.tracker.poll_interval(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = SessionConfig::default();
        config.validate().unwrap();
        assert_eq!(config.paradigm.fixation_range_ms, (500, 1500));
        let frame = config.frame_interval();
        assert!(frame > Duration::from_micros(8_300) && frame < Duration::from_micros(8_400));
    }

    #[test]
    fn partial_json_overrides_defaults() {
        let config = SessionConfig::from_json_str(
            r#"{
                "refresh_rate_hz": 60,
                "paradigm": { "practice_trials": 3, "fixation_range_ms": [300, 400] },
                "tracker": { "max_offset_stddev_us": 500 }
            }"#,
        )
        .unwrap();
        assert_eq!(config.refresh_rate_hz, 60.0);
        assert_eq!(config.paradigm.practice_trials, 3);
        assert_eq!(config.paradigm.experiment_trials, 100);
        assert_eq!(config.tracker.max_offset_stddev(), Duration::from_micros(500));
        assert_eq!(config.bus_capacity, 1024);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(
            SessionConfig::from_json_str(r#"{ "refresh_rate_hz": 0 }"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            SessionConfig::from_json_str(r#"{ "bus_capacity": 0 }"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            SessionConfig::from_json_str(r#"{ "paradigm": { "fixation_range_ms": [900, 100] } }"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            SessionConfig::from_json_str("{ not json"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = SessionConfig::load("/nonexistent/cogex.json").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/cogex.json"));
    }
}
