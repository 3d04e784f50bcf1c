//! Standard speeded reaction-time paradigm built from blocks:
//! fixation, then the stimulus alongside the response window, feedback and
//! the inter-trial interval.

use crate::block::Block;
use crate::config::ParadigmConfig;
use crate::predicate::{Condition, Predicate};
use crate::trial::{CompositionError, Trial};
use cogex_core::{ArrowDirection, Response, SessionPhase, StimulusType, Surface, SurfaceId};
use rand::Rng;
use std::time::Duration;

pub const FIXATION: SurfaceId = SurfaceId(1);
pub const STIMULUS: SurfaceId = SurfaceId(2);
pub const FEEDBACK_HIT: SurfaceId = SurfaceId(3);
pub const FEEDBACK_MISS: SurfaceId = SurfaceId(4);

// Stimulus positions are drawn from this region of an 800x600 reference canvas.
const CANVAS: (f32, f32) = (800.0, 600.0);

/// Randomized parameters of one trial.
#[derive(Debug, Clone, PartialEq)]
pub struct TrialPlan {
    pub fixation: Duration,
    pub stimulus: StimulusType,
    /// Normalized centre.
    pub position: (f32, f32),
}

impl TrialPlan {
    pub fn generate<R: Rng>(config: &ParadigmConfig, rng: &mut R) -> Self {
        let (lo, hi) = config.fixation_range_ms;
        let fixation = Duration::from_millis(rng.random_range(lo..=hi));
        let stimulus = match rng.random_range(0..3) {
            0 => StimulusType::Circle {
                radius: 50.0,
                color: [255, 0, 0, 255],
            },
            1 => StimulusType::Rectangle {
                width: 80.0,
                height: 60.0,
                color: [0, 255, 0, 255],
            },
            _ => StimulusType::Arrow {
                direction: ArrowDirection::Right,
                size: 60.0,
                color: [0, 0, 255, 255],
            },
        };
        let x = rng.random_range(100.0..700.0) / CANVAS.0;
        let y = rng.random_range(100.0..500.0) / CANVAS.1;
        Self {
            fixation,
            stimulus,
            position: (x, y),
        }
    }

    pub fn into_trial(
        self,
        config: &ParadigmConfig,
        label: impl Into<String>,
    ) -> Result<Trial, CompositionError> {
        let stimulus_ms = Duration::from_millis(config.stimulus_duration_ms);
        let window = stimulus_ms + Duration::from_millis(config.response_window_ms);
        let feedback = Duration::from_millis(config.feedback_duration_ms);

        let fixation = Surface::new(FIXATION, "fixation", StimulusType::fixation());
        let target = Surface::new(STIMULUS, "stimulus", self.stimulus)
            .at(self.position.0, self.position.1);
        let hit = Surface::new(FEEDBACK_HIT, "hit", feedback_text("Correct", [0, 200, 0, 255]));
        let miss = Surface::new(
            FEEDBACK_MISS,
            "miss",
            feedback_text("Too slow", [200, 0, 0, 255]),
        );

        let root = Block::sequence([
            Block::display(fixation, self.fixation).labelled("fixation"),
            Block::parallel([
                Block::display(target, stimulus_ms).labelled("stimulus"),
                Block::input_wait(Predicate::key(config.response_key.clone()))
                    .timeout(window)
                    .min_rt(Duration::from_millis(config.min_rt_ms))
                    .correct(Response::Key(config.response_key.clone()))
                    .labelled("response"),
            ]),
            Block::branch(
                Condition::matched("response"),
                Block::display(hit, feedback).labelled("feedback_hit"),
                Block::display(miss, feedback).labelled("feedback_miss"),
            ),
            Block::wait(Duration::from_millis(config.inter_trial_interval_ms)).labelled("iti"),
        ]);
        Trial::new(label, root)
    }
}

fn feedback_text(content: &str, color: [u8; 4]) -> StimulusType {
    StimulusType::Text {
        content: content.to_string(),
        size: 32.0,
        color,
    }
}

pub fn reaction_time_trial<R: Rng>(
    config: &ParadigmConfig,
    rng: &mut R,
    label: impl Into<String>,
) -> Result<Trial, CompositionError> {
    TrialPlan::generate(config, rng).into_trial(config, label)
}

/// Trials for one session phase; empty for phases that record no data.
pub fn phase_trials<R: Rng>(
    config: &ParadigmConfig,
    phase: SessionPhase,
    rng: &mut R,
) -> Result<Vec<Trial>, CompositionError> {
    let (count, prefix) = match phase {
        SessionPhase::Practice => (config.practice_trials, "practice"),
        SessionPhase::Experiment => (config.experiment_trials, "experiment"),
        _ => return Ok(Vec::new()),
    };
    (1..=count)
        .map(|n| reaction_time_trial(config, rng, format!("{prefix}-{n}")))
        .collect()
}
