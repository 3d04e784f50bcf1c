use cogex_core::{AbortCause, AbortRequest, TrialResult, TrialStatus};
use serde::Serialize;
use std::time::Duration;

/// Debrief numbers for one block of trials.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Summary {
    pub trials: usize,
    pub completed: usize,
    pub skipped: usize,
    pub faulted: usize,
    pub responses: usize,
    pub correct: usize,
    /// Correct responses over trials that declared an expected response.
    pub accuracy: Option<f64>,
    pub mean_rt_ms: Option<f64>,
    pub deadline_misses: u64,
    pub events_dropped: u64,
}

impl Summary {
    pub fn of(results: &[TrialResult], response: &str) -> Self {
        let mut s = Summary {
            trials: results.len(),
            ..Summary::default()
        };
        let mut rts: Vec<Duration> = Vec::new();
        let mut scored = 0usize;
        for r in results {
            match &r.status {
                TrialStatus::Completed => s.completed += 1,
                TrialStatus::Aborted(AbortCause::Fault(_)) => s.faulted += 1,
                TrialStatus::Aborted(AbortCause::Requested(AbortRequest::Skip)) => s.skipped += 1,
                TrialStatus::Aborted(AbortCause::Requested(_)) => {}
            }
            s.deadline_misses += r.stats.deadline_misses;
            s.events_dropped += r.events_dropped;
            let Some(outcome) = r.outcome(response) else {
                continue;
            };
            if let Some(rt) = outcome.rt() {
                s.responses += 1;
                rts.push(rt);
            }
            if let Some(correct) = outcome.correct {
                scored += 1;
                s.correct += usize::from(correct);
            }
        }
        if scored > 0 {
            s.accuracy = Some(s.correct as f64 / scored as f64);
        }
        if !rts.is_empty() {
            let total: Duration = rts.iter().sum();
            s.mean_rt_ms = Some(total.as_nanos() as f64 / 1e6 / rts.len() as f64);
        }
        s
    }
}

/// Whether the run ended because a trial asked to end the session.
pub fn ended_session(results: &[TrialResult]) -> bool {
    results.iter().any(|r| {
        r.status == TrialStatus::Aborted(AbortCause::Requested(AbortRequest::EndSession))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cogex_core::{Fault, InputOutcome, OutcomeKind, Response, Timestamp, TimingStats};

    fn result(status: TrialStatus, outcome: Option<InputOutcome>) -> TrialResult {
        TrialResult {
            trial: 1,
            label: "t".into(),
            status,
            started_at: Timestamp::ZERO,
            duration: Duration::from_secs(1),
            outcomes: outcome.into_iter().collect(),
            timings: Vec::new(),
            stats: TimingStats {
                deadline_misses: 1,
                ..TimingStats::default()
            },
            events_dropped: 0,
            link_notices: Vec::new(),
            markers_failed: 0,
        }
    }

    fn matched(rt_ms: u64, correct: bool) -> InputOutcome {
        InputOutcome {
            name: "response".into(),
            onset: Duration::from_millis(500),
            kind: OutcomeKind::Matched {
                response: Response::Key("space".into()),
                at: Duration::from_millis(500 + rt_ms),
                rt: Duration::from_millis(rt_ms),
            },
            correct: Some(correct),
        }
    }

    fn timed_out() -> InputOutcome {
        InputOutcome {
            name: "response".into(),
            onset: Duration::from_millis(500),
            kind: OutcomeKind::TimedOut {
                at: Duration::from_millis(2700),
            },
            correct: Some(false),
        }
    }

    #[test]
    fn summarizes_a_mixed_block() {
        let results = vec![
            result(TrialStatus::Completed, Some(matched(200, true))),
            result(TrialStatus::Completed, Some(matched(400, true))),
            result(TrialStatus::Completed, Some(timed_out())),
            result(
                TrialStatus::Aborted(AbortCause::Fault(Fault::TrackerDisconnected {
                    block: "gaze".into(),
                })),
                None,
            ),
        ];
        let s = Summary::of(&results, "response");
        assert_eq!(s.trials, 4);
        assert_eq!(s.completed, 3);
        assert_eq!(s.faulted, 1);
        assert_eq!(s.responses, 2);
        assert_eq!(s.correct, 2);
        assert_eq!(s.mean_rt_ms, Some(300.0));
        assert!((s.accuracy.unwrap() - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(s.deadline_misses, 4);
    }

    #[test]
    fn empty_block_has_no_rates() {
        let s = Summary::of(&[], "response");
        assert_eq!(s, Summary::default());
    }

    #[test]
    fn detects_end_of_session() {
        let end = TrialStatus::Aborted(AbortCause::Requested(AbortRequest::EndSession));
        assert!(ended_session(&[result(end, None)]));
        assert!(!ended_session(&[result(TrialStatus::Completed, None)]));
    }
}
