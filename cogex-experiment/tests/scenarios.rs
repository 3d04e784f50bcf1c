use cogex_core::{
    AbortCause, AbortRequest, Clock, DeviceKind, EndReason, Eye, Fault, GazePoint, InterestArea,
    LinkStatus, OutcomeKind, PollMode, Renderer, Response, Shape, StimulusType, Surface, SurfaceId,
    Timestamp, TrialResult, TrialStatus,
};
use cogex_devices::ScriptedDevice;
use cogex_experiment::paradigm;
use cogex_experiment::{
    Block, Condition, ParadigmConfig, Predicate, SchedulerState, Session, SessionBuilder,
    SessionConfig, SimRenderer, Trial,
};
use cogex_timing::SimClock;
use cogex_tracker::SimulatedTracker;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

const FRAME: Duration = Duration::from_millis(1);

fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}

fn at(v: u64) -> Timestamp {
    Timestamp::from_millis(v)
}

fn shared(clock: &SimClock) -> Arc<dyn Clock> {
    Arc::new(clock.clone())
}

fn keyboard(clock: &SimClock) -> ScriptedDevice {
    ScriptedDevice::new("kbd", DeviceKind::Keyboard, shared(clock))
}

/// 1 kHz simulated frames starting from zero, so trials start at 1 ms.
fn session(
    clock: &SimClock,
    devices: Vec<ScriptedDevice>,
    tracker: Option<SimulatedTracker>,
) -> Session<SimRenderer> {
    let config = SessionConfig {
        refresh_rate_hz: 1000.0,
        ..SessionConfig::default()
    };
    let mut builder = SessionBuilder::new(config).clock(shared(clock));
    for device in devices {
        builder = builder.device(Box::new(device), PollMode::Inline);
    }
    if let Some(tracker) = tracker {
        builder = builder.tracker(Box::new(tracker), PollMode::Inline);
    }
    builder.build(SimRenderer::new(clock.clone(), FRAME)).unwrap()
}

fn surface(id: u32) -> Surface {
    Surface::new(
        SurfaceId(id),
        format!("s{id}"),
        StimulusType::Circle {
            radius: 10.0,
            color: [255, 255, 255, 255],
        },
    )
}

fn image_then_response() -> Trial {
    Trial::new(
        "scenario",
        Block::sequence([
            Block::display(surface(1), ms(200)).labelled("img"),
            Block::input_wait(Predicate::key("space"))
                .timeout(ms(2000))
                .labelled("resp"),
            Block::wait(ms(500)).labelled("isi"),
        ]),
    )
    .unwrap()
}

fn run_with_keys(keys: &[(u64, &str)], trial: &mut Trial) -> TrialResult {
    let clock = SimClock::new();
    let mut kbd = keyboard(&clock);
    for (t, name) in keys {
        kbd = kbd.key_down(at(*t), name).key_up(at(*t + 5), name);
    }
    let mut session = session(&clock, vec![kbd], None);
    session.run(trial)
}

#[test]
fn response_during_wait_ends_it_early() {
    // Trial starts at 1 ms, so a press at 301 ms is 300 ms into the trial
    // and 100 ms into the response window.
    let result = run_with_keys(&[(301, "space")], &mut image_then_response());
    assert_eq!(result.status, TrialStatus::Completed);

    let resp = result.outcome("resp").unwrap();
    assert_eq!(
        resp.kind,
        OutcomeKind::Matched {
            response: Response::Key("space".into()),
            at: ms(300),
            rt: ms(100),
        }
    );
    assert_eq!(resp.onset, ms(200));
    assert_eq!(result.duration, ms(800));

    let img = result.timing("img").unwrap();
    assert_eq!(img.actual(), ms(200));
    assert_eq!(img.error_ns(), Some(0));
    assert_eq!(result.timing("isi").unwrap().actual(), ms(500));
}

#[test]
fn response_three_hundred_ms_into_the_window_gives_one_second_trial() {
    let result = run_with_keys(&[(501, "space")], &mut image_then_response());
    assert_eq!(result.status, TrialStatus::Completed);
    assert_eq!(result.outcome("resp").unwrap().rt(), Some(ms(300)));
    assert_eq!(result.duration, ms(1000));
    assert_eq!(result.stats.ticks, 1000);
    assert_eq!(result.stats.deadline_misses, 0);
    assert_eq!(result.stats.events_delivered, 2);
}

#[test]
fn other_keys_do_not_match() {
    let result = run_with_keys(&[(250, "x"), (401, "space")], &mut image_then_response());
    assert_eq!(result.outcome("resp").unwrap().rt(), Some(ms(200)));
}

#[test]
fn sequence_children_run_strictly_in_order() {
    let mut trial = Trial::new(
        "seq",
        Block::sequence([
            Block::wait(ms(10)).labelled("a"),
            Block::wait(ms(20)).labelled("b"),
            Block::wait(ms(30)).labelled("c"),
        ]),
    )
    .unwrap();
    let result = run_with_keys(&[], &mut trial);
    let spans: Vec<_> = result
        .timings
        .iter()
        .map(|t| (t.block.as_str(), t.onset, t.offset))
        .collect();
    assert_eq!(
        spans,
        [
            ("a", ms(0), ms(10)),
            ("b", ms(10), ms(30)),
            ("c", ms(30), ms(60)),
        ]
    );
    assert_eq!(result.duration, ms(60));
}

#[test]
fn parallel_joins_on_the_last_child() {
    let mut trial = Trial::new(
        "par",
        Block::parallel([
            Block::wait(ms(120)).labelled("slow"),
            Block::wait(ms(50)).labelled("fast"),
        ]),
    )
    .unwrap();
    let result = run_with_keys(&[], &mut trial);
    assert_eq!(result.timing("fast").unwrap().offset, ms(50));
    assert_eq!(result.timing("slow").unwrap().offset, ms(120));
    assert_eq!(result.duration, ms(120));
}

#[test]
fn unanswered_wait_times_out() {
    let mut trial = Trial::new(
        "timeout",
        Block::input_wait(Predicate::AnyKey)
            .timeout(ms(300))
            .labelled("resp"),
    )
    .unwrap();
    let result = run_with_keys(&[], &mut trial);
    let resp = result.outcome("resp").unwrap();
    assert_eq!(resp.kind, OutcomeKind::TimedOut { at: ms(300) });
    assert!(!resp.is_matched());
    assert!(result.duration >= ms(300));
    assert_eq!(result.status, TrialStatus::Completed);
}

#[test]
fn events_before_trial_start_are_not_delivered() {
    let mut trial = Trial::new(
        "stale",
        Block::input_wait(Predicate::AnyKey).timeout(ms(50)).labelled("resp"),
    )
    .unwrap();
    let clock = SimClock::new();
    let kbd = keyboard(&clock).key_down(at(0), "a");
    let mut session = session(&clock, vec![kbd], None);
    let result = session.run(&mut trial);
    assert_eq!(result.stats.stale_events, 1);
    assert_eq!(result.stats.events_delivered, 0);
    assert!(matches!(
        result.outcome("resp").unwrap().kind,
        OutcomeKind::TimedOut { .. }
    ));
}

#[test]
fn response_cancels_an_untimed_prompt() {
    let mut trial = Trial::new(
        "race",
        Block::parallel([
            Block::display_untimed(surface(3)).labelled("prompt"),
            Block::input_wait(Predicate::key("space"))
                .cancels("prompt")
                .labelled("resp"),
        ]),
    )
    .unwrap();
    let clock = SimClock::new();
    let kbd = keyboard(&clock).key_down(at(101), "space");
    let mut session = session(&clock, vec![kbd], None);
    let result = session.run(&mut trial);

    assert_eq!(result.status, TrialStatus::Completed);
    assert_eq!(result.duration, ms(100));
    let prompt = result.timing("prompt").unwrap();
    assert_eq!(prompt.ended, EndReason::Cancelled);
    assert_eq!(prompt.offset, ms(100));

    session.renderer_mut().frame_tick();
    assert!(session.renderer().visible().is_empty());
}

#[test]
fn display_deadline_beats_a_cancel_in_the_same_tick() {
    let mut trial = Trial::new(
        "tie",
        Block::parallel([
            Block::display(surface(4), ms(100)).labelled("stim"),
            Block::input_wait(Predicate::AnyKey)
                .cancels("stim")
                .labelled("resp"),
        ]),
    )
    .unwrap();
    let result = run_with_keys(&[(101, "k")], &mut trial);
    let stim = result.timing("stim").unwrap();
    assert_eq!(stim.ended, EndReason::Elapsed);
    assert_eq!(stim.actual(), ms(100));
    assert!(result.outcome("resp").unwrap().is_matched());
}

#[test]
fn external_abort_is_observed_on_the_next_tick() {
    let mut trial = Trial::new(
        "abort",
        Block::sequence([
            Block::display(surface(5), ms(500)).labelled("stim"),
            Block::input_wait(Predicate::AnyKey).labelled("resp"),
        ]),
    )
    .unwrap();
    let clock = SimClock::new();
    let mut session = session(&clock, vec![], None);
    let handle = session.abort_handle();

    let mut scheduler = session.scheduler(&mut trial);
    for _ in 0..50 {
        assert_eq!(scheduler.tick(), SchedulerState::Running);
    }
    handle.request(AbortRequest::Skip);
    assert_eq!(scheduler.tick(), SchedulerState::Aborted);
    assert_eq!(scheduler.tick(), SchedulerState::Aborted);
    let result = scheduler.into_result().unwrap();

    assert_eq!(
        result.status,
        TrialStatus::Aborted(AbortCause::Requested(AbortRequest::Skip))
    );
    assert_eq!(result.status.tracker_code(), 2);
    assert_eq!(result.duration, ms(49));
    let stim = result.timing("stim").unwrap();
    assert_eq!(stim.ended, EndReason::Aborted);
    assert!(result.outcome("resp").is_none());
    assert!(!handle.is_requested());

    session.renderer_mut().frame_tick();
    assert!(session.renderer().visible().is_empty());
}

#[test]
fn waiting_only_on_input_is_suspended() {
    let mut trial = Trial::new(
        "suspend",
        Block::sequence([
            Block::wait(ms(2)),
            Block::input_wait(Predicate::AnyKey).timeout(ms(5)),
        ]),
    )
    .unwrap();
    let clock = SimClock::new();
    let mut session = session(&clock, vec![], None);
    let mut scheduler = session.scheduler(&mut trial);
    assert_eq!(scheduler.state(), SchedulerState::Idle);
    assert_eq!(scheduler.tick(), SchedulerState::Running);
    assert_eq!(scheduler.started_at(), Some(at(1)));
    assert_eq!(scheduler.tick(), SchedulerState::Running);
    assert_eq!(scheduler.tick(), SchedulerState::Suspended);
    let result = scheduler.run_to_end();
    assert_eq!(result.duration, ms(7));
}

#[test]
fn abort_block_ends_the_trial() {
    let mut trial = Trial::new(
        "abort-block",
        Block::sequence([
            Block::wait(ms(10)),
            Block::abort(AbortRequest::Skip),
            Block::wait(ms(10)).labelled("never"),
        ]),
    )
    .unwrap();
    let result = run_with_keys(&[], &mut trial);
    assert_eq!(
        result.status,
        TrialStatus::Aborted(AbortCause::Requested(AbortRequest::Skip))
    );
    assert_eq!(result.duration, ms(10));
    assert!(result.timing("never").is_none_or(|t| t.ended == EndReason::Aborted));
}

#[test]
fn run_all_repeats_and_ends_on_request() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);
    let flaky = Trial::new(
        "flaky",
        Block::sequence([
            Block::wait(ms(5)),
            Block::when(
                Condition::custom(move |_| counter.fetch_add(1, Ordering::SeqCst) == 0),
                Block::abort(AbortRequest::Repeat),
            ),
        ]),
    )
    .unwrap();
    let steady = Trial::new("steady", Block::wait(ms(5))).unwrap();

    let clock = SimClock::new();
    let mut session = session(&clock, vec![], None);
    let results = session.run_all(&mut [flaky, steady]);
    let summary: Vec<_> = results
        .iter()
        .map(|r| (r.label.as_str(), r.status.tracker_code()))
        .collect();
    assert_eq!(summary, [("flaky", 3), ("flaky", 0), ("steady", 0)]);
    assert_eq!(results[2].trial, 3);

    let stop = Trial::new("stop", Block::abort(AbortRequest::EndSession)).unwrap();
    let after = Trial::new("after", Block::wait(ms(5))).unwrap();
    let results = session.run_all(&mut [stop, after]);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].status.tracker_code(), 27);
    assert_eq!(results[0].duration, Duration::ZERO);
}

#[test]
fn min_rt_and_accuracy() {
    let mut trial = Trial::new(
        "choice",
        Block::input_wait(Predicate::keys(["f", "j"]))
            .min_rt(ms(100))
            .timeout(ms(1000))
            .correct(Response::Key("f".into()))
            .labelled("choice"),
    )
    .unwrap();
    let result = run_with_keys(&[(51, "f"), (151, "j")], &mut trial);
    let choice = result.outcome("choice").unwrap();
    assert_eq!(choice.response(), Some(&Response::Key("j".into())));
    assert_eq!(choice.rt(), Some(ms(150)));
    assert_eq!(choice.correct, Some(false));
}

#[test]
fn branch_reads_the_recorded_outcome() {
    let build = || {
        Trial::new(
            "branch",
            Block::sequence([
                Block::input_wait(Predicate::AnyKey)
                    .timeout(ms(100))
                    .labelled("resp"),
                Block::branch(
                    Condition::matched("resp"),
                    Block::wait(ms(10)).labelled("hit"),
                    Block::wait(ms(10)).labelled("miss"),
                ),
            ]),
        )
        .unwrap()
    };
    let hit = run_with_keys(&[(21, "a")], &mut build());
    assert!(hit.timing("hit").is_some() && hit.timing("miss").is_none());
    let miss = run_with_keys(&[], &mut build());
    assert!(miss.timing("miss").is_some() && miss.timing("hit").is_none());
}

#[test]
fn counted_loop_reruns_its_body() {
    let mut trial = Trial::new("loop", Block::repeat(3, Block::wait(ms(10)))).unwrap();
    let result = run_with_keys(&[], &mut trial);
    assert_eq!(result.timings.len(), 3);
    assert!(result.timings.iter().all(|t| t.actual() == ms(10)));
    assert_eq!(result.duration, ms(30));
}

#[test]
fn identical_feed_gives_identical_result() {
    let config = ParadigmConfig::default();
    let run_once = || {
        let mut trial =
            paradigm::reaction_time_trial(&config, &mut StdRng::seed_from_u64(11), "rt").unwrap();
        run_with_keys(&[(900, "space"), (1400, "space")], &mut trial)
    };
    let first = run_once();
    let second = run_once();
    assert_eq!(first, second);
    assert_eq!(first.status, TrialStatus::Completed);
}

fn right_area() -> InterestArea {
    InterestArea::new(Shape::rect(0.6, 0.4, 0.2, 0.2), "right")
}

#[test]
fn offset_tracker_gaze_is_translated_to_local_time() {
    let clock = SimClock::new();
    let tracker = SimulatedTracker::new(shared(&clock))
        .with_offset(Duration::from_secs(5))
        .gaze_at(at(101), Eye::Right, GazePoint::new(0.2, 0.5))
        .gaze_at(at(151), Eye::Left, GazePoint::new(0.7, 0.5))
        .gaze_at(at(201), Eye::Right, GazePoint::new(0.7, 0.5));
    let sent = tracker.sent_log();
    let mut session = session(&clock, vec![], Some(tracker));
    let mut trial = Trial::new(
        "gaze",
        Block::input_wait(Predicate::GazeIn(vec![right_area()]))
            .timeout(ms(1000))
            .labelled("look"),
    )
    .unwrap();
    let result = session.run(&mut trial);

    let look = result.outcome("look").unwrap();
    assert_eq!(look.response(), Some(&Response::Area("right".into())));
    let rt = look.rt().unwrap();
    assert!(rt.abs_diff(ms(200)) < FRAME, "rt {rt:?}");
    let estimate = session.tracker_estimate().unwrap();
    assert!((estimate.offset_ns + 5e9).abs() < 1e6);

    let markers: Vec<String> = sent
        .lock()
        .iter()
        .filter(|m| m.starts_with("MSG "))
        .filter_map(|m| m.splitn(4, ' ').nth(3).map(str::to_string))
        .collect();
    assert_eq!(markers[0], "TRIALID 1");
    assert!(markers[1].starts_with("!V IAREA RECTANGLE 1"));
    assert!(markers.contains(&"look.END_RT".to_string()));
    assert_eq!(markers.last().map(String::as_str), Some("TRIAL_RESULT 0"));
}

#[test]
fn display_markers_follow_the_flip() {
    let clock = SimClock::new();
    let tracker = SimulatedTracker::new(shared(&clock));
    let sent = tracker.sent_log();
    let mut session = session(&clock, vec![], Some(tracker));
    let mut trial = Trial::new("flip", Block::display(surface(6), ms(20)).labelled("stim")).unwrap();
    let result = session.run(&mut trial);
    assert_eq!(result.markers_failed, 0);

    let markers: Vec<(u64, String)> = sent
        .lock()
        .iter()
        .filter_map(|m| {
            let mut parts = m.splitn(4, ' ');
            let _ = parts.next().filter(|p| *p == "MSG")?;
            let _seq = parts.next()?;
            let local = parts.next()?.parse().ok()?;
            Some((local, parts.next()?.to_string()))
        })
        .collect();
    let onset = session.renderer().onset_of(SurfaceId(6)).unwrap();
    assert!(markers.contains(&(onset.as_nanos(), "stim.SYNCTIME".to_string())));
    assert!(markers.iter().any(|(_, label)| label == "stim.OFFSET"));
}

#[test]
fn tracker_loss_faults_a_gaze_wait() {
    let clock = SimClock::new();
    let tracker = SimulatedTracker::new(shared(&clock)).disconnect_at(at(100));
    let mut session = session(&clock, vec![], Some(tracker));
    let mut trial = Trial::new(
        "gaze",
        Block::input_wait(Predicate::GazeIn(vec![right_area()]))
            .timeout(ms(500))
            .labelled("look"),
    )
    .unwrap();
    let result = session.run(&mut trial);

    assert_eq!(
        result.status,
        TrialStatus::Aborted(AbortCause::Fault(Fault::TrackerDisconnected {
            block: "look".into()
        }))
    );
    assert_eq!(result.status.tracker_code(), -1);
    assert_eq!(result.duration, ms(99));
    assert_eq!(result.markers_failed, 1);
    assert!(!session.tracker_connected());
    assert_eq!(session.link_history().len(), 1);
}

#[test]
fn tracker_loss_does_not_stop_a_plain_trial() {
    let clock = SimClock::new();
    let tracker = SimulatedTracker::new(shared(&clock)).disconnect_at(at(100));
    let mut session = session(&clock, vec![], Some(tracker));
    let mut trial = Trial::new("plain", Block::wait(ms(300))).unwrap();
    let result = session.run(&mut trial);

    assert_eq!(result.status, TrialStatus::Completed);
    assert_eq!(result.duration, ms(300));
    assert_eq!(result.link_notices.len(), 1);
    assert_eq!(result.link_notices[0].status, LinkStatus::Disconnected);
    assert_eq!(result.link_notices[0].at, ms(99));

    // The next gaze-contingent trial fails at activation.
    let mut gaze = Trial::new(
        "gaze",
        Block::display(surface(2), ms(100)).gaze_contingent().labelled("gc"),
    )
    .unwrap();
    let result = session.run(&mut gaze);
    assert!(result.status.is_fault());
}

#[test]
fn held_fixation_matches_from_its_start() {
    let clock = SimClock::new();
    let tracker = SimulatedTracker::new(shared(&clock))
        .with_offset(Duration::from_millis(750))
        .fixation(at(101), at(400), Eye::Right, GazePoint::new(0.7, 0.5), ms(10));
    let mut session = session(&clock, vec![], Some(tracker));
    let mut trial = Trial::new(
        "fix",
        Block::input_wait(Predicate::fixation_in(vec![right_area()], ms(150)))
            .timeout(ms(1000))
            .labelled("fix"),
    )
    .unwrap();
    let result = session.run(&mut trial);

    let fix = result.outcome("fix").unwrap();
    assert_eq!(fix.response(), Some(&Response::Area("right".into())));
    assert!(fix.rt().unwrap().abs_diff(ms(100)) < FRAME);
    assert!(result.duration.abs_diff(ms(250)) < FRAME);
}

#[test]
fn frame_calibration_sets_the_interval() {
    let clock = SimClock::new();
    let mut session = session(&clock, vec![], None);
    let stats = session.calibrate_frames(30);
    assert_eq!(stats.samples, 30);
    assert_eq!(session.frame_interval(), FRAME);
    assert!((stats.effective_fps - 1000.0).abs() < 1e-6);
}
