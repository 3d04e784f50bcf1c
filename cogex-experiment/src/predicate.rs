use crate::context::ExecutionContext;
use cogex_core::{
    BusEvent, DeviceId, DeviceInput, Eye, FixationPhase, InterestArea, Response, Timestamp,
    TrackerEventKind,
};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub type EventFn = Arc<dyn Fn(&BusEvent) -> Option<Response> + Send + Sync>;
pub type ContextFn = Arc<dyn Fn(&ExecutionContext) -> bool + Send + Sync>;

/// What an input wait is waiting for.
#[derive(Clone)]
pub enum Predicate {
    AnyKey,
    Key(String),
    KeyIn(Vec<String>),
    /// A specific button, or any button with `None`.
    Button(Option<u8>),
    VoiceOnset,
    /// Rising edge on a digital line.
    Line(u8),
    /// Loss of a specific device, or of any device with `None`.
    DeviceLost(Option<DeviceId>),
    FromDevice(DeviceId, Box<Predicate>),
    /// A gaze sample from the tracked eye inside any of the areas.
    GazeIn(Vec<InterestArea>),
    /// A fixation inside one area, held for at least `min_duration`.
    /// Matches at the time the fixation started.
    FixationIn {
        areas: Vec<InterestArea>,
        min_duration: Duration,
        held: Option<(usize, Timestamp)>,
    },
    AnyOf(Vec<Predicate>),
    Custom(EventFn),
}

impl Predicate {
    pub fn key(name: impl Into<String>) -> Self {
        Predicate::Key(name.into())
    }

    pub fn keys<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Predicate::KeyIn(names.into_iter().map(Into::into).collect())
    }

    pub fn fixation_in(areas: Vec<InterestArea>, min_duration: Duration) -> Self {
        Predicate::FixationIn {
            areas,
            min_duration,
            held: None,
        }
    }

    pub fn from_device(device: impl Into<DeviceId>, inner: Predicate) -> Self {
        Predicate::FromDevice(device.into(), Box::new(inner))
    }

    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&BusEvent) -> Option<Response> + Send + Sync + 'static,
    {
        Predicate::Custom(Arc::new(f))
    }

    /// Returns the response and the time it counts from.
    pub fn evaluate(&mut self, ev: &BusEvent, eye: Eye) -> Option<(Response, Timestamp)> {
        let ts = ev.timestamp();
        match self {
            Predicate::AnyKey => match ev.as_device()?.input() {
                DeviceInput::Key {
                    name,
                    pressed: true,
                } => Some((Response::Key(name.clone()), ts)),
                _ => None,
            },
            Predicate::Key(want) => match ev.as_device()?.input() {
                DeviceInput::Key {
                    name,
                    pressed: true,
                } if name.as_str() == want.as_str() => Some((Response::Key(name.clone()), ts)),
                _ => None,
            },
            Predicate::KeyIn(wanted) => match ev.as_device()?.input() {
                DeviceInput::Key {
                    name,
                    pressed: true,
                } if wanted.iter().any(|w| w == name) => Some((Response::Key(name.clone()), ts)),
                _ => None,
            },
            Predicate::Button(want) => match ev.as_device()?.input() {
                DeviceInput::Button {
                    index,
                    pressed: true,
                } if want.is_none_or(|w| w == *index) => Some((Response::Button(*index), ts)),
                _ => None,
            },
            Predicate::VoiceOnset => match ev.as_device()?.input() {
                DeviceInput::VoiceOnset { .. } => Some((Response::VoiceOnset, ts)),
                _ => None,
            },
            Predicate::Line(want) => match ev.as_device()?.input() {
                DeviceInput::Line { line, high: true } if *line == *want => {
                    Some((Response::Line(*line), ts))
                }
                _ => None,
            },
            Predicate::DeviceLost(want) => {
                let dev = ev.as_device()?;
                if !dev.is_lost() || want.as_ref().is_some_and(|w| w != dev.device()) {
                    return None;
                }
                Some((Response::DeviceLost(dev.device().clone()), ts))
            }
            Predicate::FromDevice(device, inner) => {
                if ev.as_device()?.device() != &*device {
                    return None;
                }
                inner.evaluate(ev, eye)
            }
            Predicate::GazeIn(areas) => {
                let tr = ev.as_tracker()?;
                match tr.kind() {
                    TrackerEventKind::Gaze { eye: e, point } if *e == eye => areas
                        .iter()
                        .find(|a| a.contains(*point))
                        .map(|a| (Response::Area(a.label.clone()), ts)),
                    _ => None,
                }
            }
            Predicate::FixationIn {
                areas,
                min_duration,
                held,
            } => {
                let tr = ev.as_tracker()?;
                if tr.eye() != Some(eye) {
                    return None;
                }
                match tr.kind() {
                    TrackerEventKind::Fixation {
                        phase,
                        point,
                        started,
                        ..
                    } => {
                        let Some(index) = areas.iter().position(|a| a.contains(*point)) else {
                            *held = None;
                            return None;
                        };
                        *held = match phase {
                            FixationPhase::End => None,
                            FixationPhase::Start | FixationPhase::Update => {
                                Some((index, *started))
                            }
                        };
                        (ts.saturating_since(*started) >= *min_duration)
                            .then(|| (Response::Area(areas[index].label.clone()), *started))
                    }
                    TrackerEventKind::Gaze { point, .. } => {
                        let (index, started) = (*held)?;
                        if !areas[index].contains(*point) {
                            *held = None;
                            return None;
                        }
                        (ts.saturating_since(started) >= *min_duration)
                            .then(|| (Response::Area(areas[index].label.clone()), started))
                    }
                    TrackerEventKind::Saccade { .. } | TrackerEventKind::Blink { .. } => {
                        *held = None;
                        None
                    }
                    TrackerEventKind::MessageAck { .. } => None,
                }
            }
            Predicate::AnyOf(preds) => preds.iter_mut().find_map(|p| p.evaluate(ev, eye)),
            Predicate::Custom(f) => (**f)(ev).map(|r| (r, ts)),
        }
    }

    /// Clears any state carried between events.
    pub fn reset(&mut self) {
        match self {
            Predicate::FixationIn { held, .. } => *held = None,
            Predicate::FromDevice(_, inner) => inner.reset(),
            Predicate::AnyOf(preds) => preds.iter_mut().for_each(Predicate::reset),
            _ => {}
        }
    }

    /// True when the predicate can only ever be satisfied by tracker data.
    pub fn requires_tracker(&self) -> bool {
        match self {
            Predicate::GazeIn(_) | Predicate::FixationIn { .. } => true,
            Predicate::FromDevice(_, inner) => inner.requires_tracker(),
            Predicate::AnyOf(preds) => {
                !preds.is_empty() && preds.iter().all(Predicate::requires_tracker)
            }
            _ => false,
        }
    }

    pub(crate) fn interest_areas(&self) -> Vec<&InterestArea> {
        match self {
            Predicate::GazeIn(areas) | Predicate::FixationIn { areas, .. } => {
                areas.iter().collect()
            }
            Predicate::FromDevice(_, inner) => inner.interest_areas(),
            Predicate::AnyOf(preds) => preds.iter().flat_map(|p| p.interest_areas()).collect(),
            _ => Vec::new(),
        }
    }

    /// Structural problem with the predicate, if any.
    pub(crate) fn defect(&self) -> Option<&'static str> {
        match self {
            Predicate::KeyIn(keys) if keys.is_empty() => Some("key set is empty"),
            Predicate::GazeIn(areas) | Predicate::FixationIn { areas, .. } if areas.is_empty() => {
                Some("no interest areas")
            }
            Predicate::FromDevice(_, inner) => inner.defect(),
            Predicate::AnyOf(preds) if preds.is_empty() => Some("any-of is empty"),
            Predicate::AnyOf(preds) => preds.iter().find_map(Predicate::defect),
            _ => None,
        }
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::AnyKey => f.write_str("AnyKey"),
            Predicate::Key(k) => f.debug_tuple("Key").field(k).finish(),
            Predicate::KeyIn(ks) => f.debug_tuple("KeyIn").field(ks).finish(),
            Predicate::Button(b) => f.debug_tuple("Button").field(b).finish(),
            Predicate::VoiceOnset => f.write_str("VoiceOnset"),
            Predicate::Line(l) => f.debug_tuple("Line").field(l).finish(),
            Predicate::DeviceLost(d) => f.debug_tuple("DeviceLost").field(d).finish(),
            Predicate::FromDevice(d, inner) => {
                f.debug_tuple("FromDevice").field(d).field(inner).finish()
            }
            Predicate::GazeIn(areas) => f.debug_tuple("GazeIn").field(areas).finish(),
            Predicate::FixationIn {
                areas,
                min_duration,
                ..
            } => f
                .debug_struct("FixationIn")
                .field("areas", areas)
                .field("min_duration", min_duration)
                .finish_non_exhaustive(),
            Predicate::AnyOf(preds) => f.debug_tuple("AnyOf").field(preds).finish(),
            Predicate::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Decision evaluated against the execution context by branches and loops.
#[derive(Clone)]
pub enum Condition {
    Always,
    /// The named input wait matched.
    Matched(String),
    TimedOut(String),
    ResponseIs(String, Response),
    /// The named input wait was judged correct.
    Correct(String),
    Flag(String),
    /// The innermost loop is on an iteration below this bound.
    IterationBelow(u32),
    Not(Box<Condition>),
    All(Vec<Condition>),
    Any(Vec<Condition>),
    Custom(ContextFn),
}

impl Condition {
    pub fn matched(name: impl Into<String>) -> Self {
        Condition::Matched(name.into())
    }

    pub fn timed_out(name: impl Into<String>) -> Self {
        Condition::TimedOut(name.into())
    }

    pub fn flag(name: impl Into<String>) -> Self {
        Condition::Flag(name.into())
    }

    pub fn not(inner: Condition) -> Self {
        Condition::Not(Box::new(inner))
    }

    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&ExecutionContext) -> bool + Send + Sync + 'static,
    {
        Condition::Custom(Arc::new(f))
    }

    pub fn evaluate(&self, ctx: &ExecutionContext) -> bool {
        match self {
            Condition::Always => true,
            Condition::Matched(name) => ctx.outcome(name).is_some_and(|o| o.is_matched()),
            Condition::TimedOut(name) => ctx.outcome(name).is_some_and(|o| {
                matches!(o.kind, cogex_core::OutcomeKind::TimedOut { .. })
            }),
            Condition::ResponseIs(name, want) => ctx
                .outcome(name)
                .and_then(|o| o.response())
                .is_some_and(|r| r == want),
            Condition::Correct(name) => ctx.outcome(name).is_some_and(|o| o.correct == Some(true)),
            Condition::Flag(name) => ctx.flag(name),
            Condition::IterationBelow(n) => ctx.iteration() < *n,
            Condition::Not(inner) => !inner.evaluate(ctx),
            Condition::All(conds) => conds.iter().all(|c| c.evaluate(ctx)),
            Condition::Any(conds) => conds.iter().any(|c| c.evaluate(ctx)),
            Condition::Custom(f) => (**f)(ctx),
        }
    }
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Always => f.write_str("Always"),
            Condition::Matched(n) => f.debug_tuple("Matched").field(n).finish(),
            Condition::TimedOut(n) => f.debug_tuple("TimedOut").field(n).finish(),
            Condition::ResponseIs(n, r) => f.debug_tuple("ResponseIs").field(n).field(r).finish(),
            Condition::Correct(n) => f.debug_tuple("Correct").field(n).finish(),
            Condition::Flag(n) => f.debug_tuple("Flag").field(n).finish(),
            Condition::IterationBelow(n) => f.debug_tuple("IterationBelow").field(n).finish(),
            Condition::Not(c) => f.debug_tuple("Not").field(c).finish(),
            Condition::All(cs) => f.debug_tuple("All").field(cs).finish(),
            Condition::Any(cs) => f.debug_tuple("Any").field(cs).finish(),
            Condition::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Expected outcome of an input wait, used to judge accuracy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expected {
    Response(Response),
    /// Withholding a response is the correct behavior.
    NoResponse,
}

impl Expected {
    pub fn judge(&self, got: Option<&Response>) -> bool {
        match (self, got) {
            (Expected::Response(want), Some(got)) => want == got,
            (Expected::Response(_), None) => false,
            (Expected::NoResponse, got) => got.is_none(),
        }
    }
}
