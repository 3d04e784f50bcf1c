use crate::source::RawSignal;
use cogex_core::DeviceInput;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerConfig {
    /// Axis values with magnitude below this read as zero.
    pub axis_deadzone: f32,
    /// Minimum axis change that produces a new event.
    pub axis_threshold: f32,
    /// Voice key trips when the level rises to this...
    pub voice_on: f32,
    /// ...and re-arms once it falls to this.
    pub voice_off: f32,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            axis_deadzone: 0.1,
            axis_threshold: 0.02,
            voice_on: 0.3,
            voice_off: 0.15,
        }
    }
}

/// Per-device state that turns raw readings into edge events.
#[derive(Debug, Clone)]
pub struct Normalizer {
    config: NormalizerConfig,
    keys_down: HashSet<String>,
    buttons_down: HashSet<u8>,
    axes: HashMap<u8, f32>,
    voice_active: bool,
    lines: u32,
}

impl Normalizer {
    pub fn new(config: NormalizerConfig) -> Self {
        Self {
            config,
            keys_down: HashSet::new(),
            buttons_down: HashSet::new(),
            axes: HashMap::new(),
            voice_active: false,
            lines: 0,
        }
    }

    pub fn normalize(&mut self, signal: RawSignal) -> Vec<DeviceInput> {
        match signal {
            RawSignal::Key { name, down } => {
                // Auto-repeat downs and stray ups carry no new information.
                let changed = if down {
                    self.keys_down.insert(name.clone())
                } else {
                    self.keys_down.remove(&name)
                };
                if changed {
                    vec![DeviceInput::Key {
                        name,
                        pressed: down,
                    }]
                } else {
                    Vec::new()
                }
            }
            RawSignal::Button { index, down } => {
                let changed = if down {
                    self.buttons_down.insert(index)
                } else {
                    self.buttons_down.remove(&index)
                };
                if changed {
                    vec![DeviceInput::Button {
                        index,
                        pressed: down,
                    }]
                } else {
                    Vec::new()
                }
            }
            RawSignal::Axis { index, value } => {
                let value = if value.abs() < self.config.axis_deadzone {
                    0.0
                } else {
                    value.clamp(-1.0, 1.0)
                };
                let last = self.axes.get(&index).copied().unwrap_or(0.0);
                let crossed_rest = (last == 0.0) != (value == 0.0);
                if crossed_rest || (value - last).abs() >= self.config.axis_threshold {
                    self.axes.insert(index, value);
                    vec![DeviceInput::Axis { index, value }]
                } else {
                    Vec::new()
                }
            }
            RawSignal::Level(level) => {
                if !self.voice_active && level >= self.config.voice_on {
                    self.voice_active = true;
                    vec![DeviceInput::VoiceOnset { level }]
                } else if self.voice_active && level <= self.config.voice_off {
                    self.voice_active = false;
                    vec![DeviceInput::VoiceOffset { level }]
                } else {
                    Vec::new()
                }
            }
            RawSignal::Lines(mask) => {
                let changed = self.lines ^ mask;
                self.lines = mask;
                (0..32u8)
                    .filter(|bit| changed & (1 << bit) != 0)
                    .map(|line| DeviceInput::Line {
                        line,
                        high: mask & (1 << line) != 0,
                    })
                    .collect()
            }
        }
    }
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(NormalizerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str, down: bool) -> RawSignal {
        RawSignal::Key {
            name: name.into(),
            down,
        }
    }

    #[test]
    fn key_repeat_is_suppressed() {
        let mut n = Normalizer::default();
        assert_eq!(n.normalize(key("a", true)).len(), 1);
        assert!(n.normalize(key("a", true)).is_empty());
        assert_eq!(
            n.normalize(key("a", false)),
            vec![DeviceInput::Key {
                name: "a".into(),
                pressed: false
            }]
        );
        assert!(n.normalize(key("a", false)).is_empty());
    }

    #[test]
    fn axis_deadzone_and_threshold() {
        let mut n = Normalizer::default();
        assert!(n.normalize(RawSignal::Axis { index: 0, value: 0.05 }).is_empty());
        assert_eq!(n.normalize(RawSignal::Axis { index: 0, value: 0.5 }).len(), 1);
        assert!(n.normalize(RawSignal::Axis { index: 0, value: 0.51 }).is_empty());
        assert_eq!(
            n.normalize(RawSignal::Axis { index: 0, value: 0.02 }),
            vec![DeviceInput::Axis { index: 0, value: 0.0 }]
        );
    }

    #[test]
    fn voice_key_hysteresis() {
        let mut n = Normalizer::default();
        assert!(n.normalize(RawSignal::Level(0.2)).is_empty());
        assert!(matches!(
            n.normalize(RawSignal::Level(0.4))[..],
            [DeviceInput::VoiceOnset { .. }]
        ));
        // Dips between the two thresholds do not re-trigger.
        assert!(n.normalize(RawSignal::Level(0.2)).is_empty());
        assert!(n.normalize(RawSignal::Level(0.5)).is_empty());
        assert!(matches!(
            n.normalize(RawSignal::Level(0.1))[..],
            [DeviceInput::VoiceOffset { .. }]
        ));
    }

    #[test]
    fn digital_lines_report_edges() {
        let mut n = Normalizer::default();
        assert_eq!(
            n.normalize(RawSignal::Lines(0b101)),
            vec![
                DeviceInput::Line { line: 0, high: true },
                DeviceInput::Line { line: 2, high: true },
            ]
        );
        assert_eq!(
            n.normalize(RawSignal::Lines(0b100)),
            vec![DeviceInput::Line { line: 0, high: false }]
        );
        assert!(n.normalize(RawSignal::Lines(0b100)).is_empty());
    }
}
