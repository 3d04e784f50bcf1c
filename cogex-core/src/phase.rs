use serde::{Deserialize, Serialize};

/// Coarse stage of an experimental session.
#[derive(Copy, Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SessionPhase {
    #[default]
    Welcome,
    Calibration,
    Practice,
    Experiment,
    Debrief,
}

impl SessionPhase {
    pub fn allows_input(&self) -> bool {
        !matches!(self, Self::Calibration)
    }

    pub fn requires_calibration(&self) -> bool {
        matches!(self, Self::Calibration)
    }

    pub fn next(&self) -> Option<Self> {
        use SessionPhase::*;
        Some(match self {
            Welcome => Calibration,
            Calibration => Practice,
            Practice => Experiment,
            Experiment => Debrief,
            Debrief => return None,
        })
    }

    /// Phases whose trials are recorded as data.
    pub fn records_results(&self) -> bool {
        matches!(self, Self::Practice | Self::Experiment)
    }

    pub fn is_practice(&self) -> bool {
        matches!(self, Self::Practice)
    }

    pub fn is_experiment(&self) -> bool {
        matches!(self, Self::Experiment)
    }

    pub fn is_welcome(&self) -> bool {
        matches!(self, Self::Welcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_run_in_order() {
        let mut phase = SessionPhase::default();
        let mut seen = vec![phase];
        while let Some(next) = phase.next() {
            seen.push(next);
            phase = next;
        }
        assert_eq!(
            seen,
            vec![
                SessionPhase::Welcome,
                SessionPhase::Calibration,
                SessionPhase::Practice,
                SessionPhase::Experiment,
                SessionPhase::Debrief,
            ]
        );
    }

    #[test]
    fn calibration_blocks_input() {
        assert!(!SessionPhase::Calibration.allows_input());
        assert!(SessionPhase::Calibration.requires_calibration());
        assert!(SessionPhase::Practice.records_results());
        assert!(!SessionPhase::Debrief.records_results());
    }
}
