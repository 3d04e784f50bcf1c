use crate::context::{ExecutionContext, PresentationCommand};
use crate::predicate::{Condition, Expected, Predicate};
use crate::trial::CompositionError;
use cogex_core::{
    AbortRequest, BlockTiming, BusEvent, EndReason, Fault, InputOutcome, InterestArea,
    OutcomeKind, Response, Surface, Timestamp,
};
use std::time::Duration;

/// Result of advancing a block by one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Running against the clock.
    Continue,
    /// Waiting for an event or for an external stop.
    Suspend,
    Done,
}

impl Step {
    fn join(self, other: Step) -> Step {
        match (self, other) {
            (Step::Continue, _) | (_, Step::Continue) => Step::Continue,
            (Step::Suspend, _) | (_, Step::Suspend) => Step::Suspend,
            (Step::Done, Step::Done) => Step::Done,
        }
    }
}

/// Pre-order position of a block in its trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct BlockId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Activity {
    Idle,
    Active { since: Timestamp },
    Done,
}

#[derive(Debug, Clone)]
pub enum LoopMode {
    Count(u32),
    /// Checked before every iteration.
    While(Condition),
}

#[derive(Debug, Clone)]
struct InputWait {
    predicate: Predicate,
    timeout: Option<Duration>,
    min_rt: Duration,
    correct: Option<Expected>,
    cancels: Vec<String>,
}

#[derive(Debug, Clone)]
enum BlockKind {
    Display {
        surface: Surface,
        duration: Option<Duration>,
        gaze_contingent: bool,
    },
    Wait {
        duration: Duration,
    },
    InputWait(InputWait),
    Sequence {
        children: Vec<Block>,
        current: usize,
    },
    Parallel {
        children: Vec<Block>,
    },
    Branch {
        condition: Condition,
        then: Box<Block>,
        otherwise: Option<Box<Block>>,
        taken: Option<bool>,
    },
    Loop {
        body: Box<Block>,
        mode: LoopMode,
        iteration: u32,
        last_restart: Option<Timestamp>,
    },
    Cancel {
        target: String,
    },
    SetFlag {
        name: String,
        value: bool,
    },
    Abort(AbortRequest),
}

/// A node of a trial's block tree. Owns its children.
#[derive(Debug, Clone)]
pub struct Block {
    id: BlockId,
    label: Option<String>,
    name: String,
    kind: BlockKind,
    state: Activity,
    misuse: Option<&'static str>,
}

impl Block {
    fn new(kind: BlockKind) -> Self {
        Self {
            id: BlockId::default(),
            label: None,
            name: String::new(),
            kind,
            state: Activity::Idle,
            misuse: None,
        }
    }

    /// Presents `surface` for `duration`.
    pub fn display(surface: Surface, duration: Duration) -> Self {
        Self::new(BlockKind::Display {
            surface,
            duration: Some(duration),
            gaze_contingent: false,
        })
    }

    /// Presents `surface` until cancelled.
    pub fn display_untimed(surface: Surface) -> Self {
        Self::new(BlockKind::Display {
            surface,
            duration: None,
            gaze_contingent: false,
        })
    }

    pub fn wait(duration: Duration) -> Self {
        Self::new(BlockKind::Wait { duration })
    }

    pub fn input_wait(predicate: Predicate) -> Self {
        Self::new(BlockKind::InputWait(InputWait {
            predicate,
            timeout: None,
            min_rt: Duration::ZERO,
            correct: None,
            cancels: Vec::new(),
        }))
    }

    pub fn sequence(children: impl IntoIterator<Item = Block>) -> Self {
        Self::new(BlockKind::Sequence {
            children: children.into_iter().collect(),
            current: 0,
        })
    }

    pub fn parallel(children: impl IntoIterator<Item = Block>) -> Self {
        Self::new(BlockKind::Parallel {
            children: children.into_iter().collect(),
        })
    }

    pub fn branch(condition: Condition, then: Block, otherwise: Block) -> Self {
        Self::new(BlockKind::Branch {
            condition,
            then: Box::new(then),
            otherwise: Some(Box::new(otherwise)),
            taken: None,
        })
    }

    /// Branch without an else arm; completes at once when the condition is false.
    pub fn when(condition: Condition, then: Block) -> Self {
        Self::new(BlockKind::Branch {
            condition,
            then: Box::new(then),
            otherwise: None,
            taken: None,
        })
    }

    pub fn repeat(count: u32, body: Block) -> Self {
        Self::new(BlockKind::Loop {
            body: Box::new(body),
            mode: LoopMode::Count(count),
            iteration: 0,
            last_restart: None,
        })
    }

    pub fn loop_while(condition: Condition, body: Block) -> Self {
        Self::new(BlockKind::Loop {
            body: Box::new(body),
            mode: LoopMode::While(condition),
            iteration: 0,
            last_restart: None,
        })
    }

    /// Stops the running block labelled `target`.
    pub fn cancel(target: impl Into<String>) -> Self {
        Self::new(BlockKind::Cancel {
            target: target.into(),
        })
    }

    pub fn set_flag(name: impl Into<String>, value: bool) -> Self {
        Self::new(BlockKind::SetFlag {
            name: name.into(),
            value,
        })
    }

    pub fn abort(request: AbortRequest) -> Self {
        Self::new(BlockKind::Abort(request))
    }

    pub fn labelled(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn timeout(self, timeout: Duration) -> Self {
        self.with_wait("timeout", |w| w.timeout = Some(timeout))
    }

    /// Ignore responses earlier than `min_rt` after onset.
    pub fn min_rt(self, min_rt: Duration) -> Self {
        self.with_wait("min_rt", |w| w.min_rt = min_rt)
    }

    pub fn correct(self, expected: Response) -> Self {
        self.with_wait("correct", |w| w.correct = Some(Expected::Response(expected)))
    }

    /// Withholding the response is the correct behavior.
    pub fn correct_withhold(self) -> Self {
        self.with_wait("correct", |w| w.correct = Some(Expected::NoResponse))
    }

    /// Cancels the running block labelled `target` when this wait matches.
    pub fn cancels(self, target: impl Into<String>) -> Self {
        let target = target.into();
        self.with_wait("cancels", |w| w.cancels.push(target))
    }

    /// Marks a display as meaningless without gaze data.
    pub fn gaze_contingent(mut self) -> Self {
        match &mut self.kind {
            BlockKind::Display {
                gaze_contingent, ..
            } => *gaze_contingent = true,
            _ => self.misuse = Some("gaze_contingent"),
        }
        self
    }

    fn with_wait(mut self, option: &'static str, f: impl FnOnce(&mut InputWait)) -> Self {
        match &mut self.kind {
            BlockKind::InputWait(wait) => f(wait),
            _ => self.misuse = Some(option),
        }
        self
    }

    pub fn id(&self) -> BlockId {
        self.id
    }

    /// Explicit label, or the derived `kind#id` once part of a trial.
    pub fn label(&self) -> &str {
        &self.name
    }

    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            BlockKind::Display { .. } => "display",
            BlockKind::Wait { .. } => "wait",
            BlockKind::InputWait(_) => "input",
            BlockKind::Sequence { .. } => "sequence",
            BlockKind::Parallel { .. } => "parallel",
            BlockKind::Branch { .. } => "branch",
            BlockKind::Loop { .. } => "loop",
            BlockKind::Cancel { .. } => "cancel",
            BlockKind::SetFlag { .. } => "set_flag",
            BlockKind::Abort(_) => "abort",
        }
    }

    pub fn is_idle(&self) -> bool {
        self.state == Activity::Idle
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, Activity::Active { .. })
    }

    pub fn is_done(&self) -> bool {
        self.state == Activity::Done
    }

    /// True when this block itself cannot run without tracker data.
    pub fn requires_tracker(&self) -> bool {
        match &self.kind {
            BlockKind::Display {
                gaze_contingent, ..
            } => *gaze_contingent,
            BlockKind::InputWait(wait) => wait.predicate.requires_tracker(),
            _ => false,
        }
    }

    pub(crate) fn assign_ids(&mut self, next: &mut u32) {
        self.id = BlockId(*next);
        *next += 1;
        self.name = match &self.label {
            Some(label) => label.clone(),
            None => format!("{}#{}", self.kind_name(), self.id.0),
        };
        for child in self.children_mut() {
            child.assign_ids(next);
        }
    }

    pub(crate) fn children(&self) -> Vec<&Block> {
        match &self.kind {
            BlockKind::Sequence { children, .. } | BlockKind::Parallel { children } => {
                children.iter().collect()
            }
            BlockKind::Branch {
                then, otherwise, ..
            } => std::iter::once(&**then).chain(otherwise.as_deref()).collect(),
            BlockKind::Loop { body, .. } => vec![&**body],
            _ => Vec::new(),
        }
    }

    fn children_mut(&mut self) -> Vec<&mut Block> {
        match &mut self.kind {
            BlockKind::Sequence { children, .. } | BlockKind::Parallel { children } => {
                children.iter_mut().collect()
            }
            BlockKind::Branch {
                then, otherwise, ..
            } => std::iter::once(&mut **then)
                .chain(otherwise.as_deref_mut())
                .collect(),
            BlockKind::Loop { body, .. } => vec![&mut **body],
            _ => Vec::new(),
        }
    }

    /// Children that may currently be running.
    fn live_children(&mut self) -> &mut [Block] {
        match &mut self.kind {
            BlockKind::Sequence { children, current } => match children.get_mut(*current) {
                Some(child) => std::slice::from_mut(child),
                None => Default::default(),
            },
            BlockKind::Parallel { children } => children.as_mut_slice(),
            BlockKind::Branch {
                then,
                otherwise,
                taken,
                ..
            } => match (taken, otherwise) {
                (Some(true), _) => std::slice::from_mut(&mut **then),
                (Some(false), Some(otherwise)) => std::slice::from_mut(&mut **otherwise),
                _ => Default::default(),
            },
            BlockKind::Loop { body, .. } => std::slice::from_mut(&mut **body),
            _ => Default::default(),
        }
    }

    pub(crate) fn check(&self) -> Result<(), CompositionError> {
        if let Some(option) = self.misuse {
            return Err(CompositionError::Misapplied {
                block: self.name.clone(),
                option,
            });
        }
        match &self.kind {
            BlockKind::Sequence { children, .. } | BlockKind::Parallel { children }
                if children.is_empty() =>
            {
                Err(CompositionError::Empty(self.name.clone()))
            }
            BlockKind::Loop {
                mode: LoopMode::Count(0),
                ..
            } => Err(CompositionError::ZeroIterations(self.name.clone())),
            BlockKind::InputWait(wait) => {
                if let Some(defect) = wait.predicate.defect() {
                    return Err(CompositionError::Predicate {
                        block: self.name.clone(),
                        defect,
                    });
                }
                if wait.timeout.is_some_and(|t| t < wait.min_rt) {
                    return Err(CompositionError::TimeoutBeforeMinRt(self.name.clone()));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    pub(crate) fn cancel_targets(&self) -> Vec<&str> {
        match &self.kind {
            BlockKind::Cancel { target } => vec![target.as_str()],
            BlockKind::InputWait(wait) => wait.cancels.iter().map(String::as_str).collect(),
            _ => Vec::new(),
        }
    }

    pub(crate) fn interest_areas(&self) -> Vec<&InterestArea> {
        match &self.kind {
            BlockKind::InputWait(wait) => wait.predicate.interest_areas(),
            _ => Vec::new(),
        }
    }

    pub(crate) fn reset(&mut self) {
        self.state = Activity::Idle;
        match &mut self.kind {
            BlockKind::Sequence { current, .. } => *current = 0,
            BlockKind::Branch { taken, .. } => *taken = None,
            BlockKind::Loop {
                iteration,
                last_restart,
                ..
            } => {
                *iteration = 0;
                *last_restart = None;
            }
            BlockKind::InputWait(wait) => wait.predicate.reset(),
            _ => {}
        }
        for child in self.children_mut() {
            child.reset();
        }
    }

    pub(crate) fn activate(&mut self, ctx: &mut ExecutionContext) {
        let now = ctx.now();
        self.state = Activity::Active { since: now };
        tracing::trace!(block = %self.name, at = %now, "block activated");
        if self.requires_tracker() && !ctx.tracker_available {
            ctx.fail(Fault::TrackerDisconnected {
                block: self.name.clone(),
            });
        }
        match &mut self.kind {
            BlockKind::Display { surface, .. } => {
                ctx.outbox.push(PresentationCommand::Present(surface.clone()));
                ctx.outbox
                    .push(PresentationCommand::Marker(format!("{}.SYNCTIME", self.name)));
            }
            BlockKind::InputWait(wait) => wait.predicate.reset(),
            BlockKind::Sequence { current, .. } => *current = 0,
            BlockKind::Branch {
                condition, taken, ..
            } => *taken = Some(condition.evaluate(ctx)),
            BlockKind::Loop {
                iteration,
                last_restart,
                ..
            } => {
                *iteration = 0;
                *last_restart = None;
            }
            BlockKind::Cancel { target } => {
                ctx.pending_cancels.push(target.clone());
                self.state = Activity::Done;
            }
            BlockKind::SetFlag { name, value } => {
                ctx.set_flag(name.clone(), *value);
                self.state = Activity::Done;
            }
            BlockKind::Abort(request) => {
                tracing::debug!(block = %self.name, ?request, "abort requested");
                ctx.abort_handle().request(*request);
                self.state = Activity::Done;
            }
            BlockKind::Wait { .. } | BlockKind::Parallel { .. } => {}
        }
    }

    /// Deadline pass: ends timed displays and waits whose duration is up.
    pub(crate) fn expire(&mut self, ctx: &mut ExecutionContext) {
        let Activity::Active { since } = self.state else {
            return;
        };
        match self.kind {
            BlockKind::Display {
                duration: Some(d), ..
            }
            | BlockKind::Wait { duration: d } => {
                if ctx.now() - since >= d {
                    self.finish(EndReason::Elapsed, ctx);
                }
            }
            BlockKind::Display { duration: None, .. } => {}
            _ => {
                for child in self.live_children() {
                    child.expire(ctx);
                }
            }
        }
    }

    /// Ends input waits whose timeout has passed. Runs after event dispatch
    /// so a response stamped before the deadline still wins.
    pub(crate) fn resolve_timeouts(&mut self, ctx: &mut ExecutionContext) {
        let Activity::Active { since } = self.state else {
            return;
        };
        if !matches!(self.kind, BlockKind::InputWait(_)) {
            for child in self.live_children() {
                child.resolve_timeouts(ctx);
            }
            return;
        }
        let BlockKind::InputWait(wait) = &self.kind else {
            return;
        };
        let Some(timeout) = wait.timeout else {
            return;
        };
        let now = ctx.now();
        if now < since + timeout {
            return;
        }
        let correct = wait.correct.as_ref().map(|e| e.judge(None));
        tracing::debug!(block = %self.name, at = %now, "input wait timed out");
        ctx.outcomes.push(InputOutcome {
            name: self.name.clone(),
            onset: ctx.rel(since),
            kind: OutcomeKind::TimedOut { at: ctx.rel(now) },
            correct,
        });
        self.state = Activity::Done;
    }

    /// Offers `ev` to this block and its running descendants.
    pub(crate) fn on_event(&mut self, ev: &BusEvent, ctx: &mut ExecutionContext) -> bool {
        let Activity::Active { since } = self.state else {
            return false;
        };
        if !matches!(self.kind, BlockKind::InputWait(_)) {
            let mut handled = false;
            for child in self.live_children() {
                handled |= child.on_event(ev, ctx);
            }
            return handled;
        }
        let BlockKind::InputWait(wait) = &mut self.kind else {
            return false;
        };
        let Some((response, at)) = wait.predicate.evaluate(ev, ctx.eye()) else {
            return false;
        };
        let ts = ev.timestamp();
        if ts < since + wait.min_rt {
            tracing::trace!(block = %self.name, at = %ts, "response before min_rt ignored");
            return false;
        }
        if wait.timeout.is_some_and(|t| ts >= since + t) {
            return false;
        }
        let at = at.max(since);
        let rt = at - since;
        let correct = wait.correct.as_ref().map(|e| e.judge(Some(&response)));
        tracing::debug!(
            block = %self.name,
            ?response,
            rt_ms = rt.as_secs_f64() * 1e3,
            ?correct,
            "input matched"
        );
        ctx.outcomes.push(InputOutcome {
            name: self.name.clone(),
            onset: ctx.rel(since),
            kind: OutcomeKind::Matched {
                response,
                at: ctx.rel(at),
                rt,
            },
            correct,
        });
        ctx.pending_cancels.extend(wait.cancels.iter().cloned());
        ctx.outbox
            .push(PresentationCommand::Marker(format!("{}.END_RT", self.name)));
        self.state = Activity::Done;
        true
    }

    pub(crate) fn advance(&mut self, ctx: &mut ExecutionContext) -> Step {
        match self.state {
            Activity::Done => return Step::Done,
            Activity::Idle => return Step::Suspend,
            Activity::Active { .. } => {}
        }
        let step = match &mut self.kind {
            BlockKind::Display {
                duration: Some(_), ..
            }
            | BlockKind::Wait { .. } => Step::Continue,
            BlockKind::Display { duration: None, .. } | BlockKind::InputWait(_) => Step::Suspend,
            BlockKind::Sequence { children, current } => advance_sequence(children, current, ctx),
            BlockKind::Parallel { children } => children
                .iter_mut()
                .fold(Step::Done, |step, child| step.join(advance_child(child, ctx))),
            BlockKind::Branch {
                then,
                otherwise,
                taken,
                ..
            } => {
                let arm = match taken {
                    Some(true) => Some(&mut **then),
                    Some(false) => otherwise.as_deref_mut(),
                    None => None,
                };
                arm.map_or(Step::Done, |arm| advance_child(arm, ctx))
            }
            BlockKind::Loop {
                body,
                mode,
                iteration,
                last_restart,
            } => advance_loop(body, mode, iteration, last_restart, ctx),
            BlockKind::Cancel { .. } | BlockKind::SetFlag { .. } | BlockKind::Abort(_) => {
                Step::Done
            }
        };
        if step == Step::Done {
            self.state = Activity::Done;
            tracing::trace!(block = %self.name, "block done");
        }
        step
    }

    /// Stops this block and everything running below it.
    pub(crate) fn stop(&mut self, reason: EndReason, ctx: &mut ExecutionContext) {
        if !self.is_active() {
            return;
        }
        for child in self.live_children() {
            child.stop(reason, ctx);
        }
        self.finish(reason, ctx);
    }

    pub(crate) fn cancel_labelled(&mut self, label: &str, ctx: &mut ExecutionContext) -> bool {
        if !self.is_active() {
            return false;
        }
        if self.name == label {
            tracing::debug!(block = label, "block cancelled");
            self.stop(EndReason::Cancelled, ctx);
            return true;
        }
        let mut found = false;
        for child in self.live_children() {
            found |= child.cancel_labelled(label, ctx);
        }
        found
    }

    /// Label of a running block that needs tracker input, if any.
    pub(crate) fn tracker_dependent(&mut self) -> Option<String> {
        if !self.is_active() {
            return None;
        }
        if self.requires_tracker() {
            return Some(self.name.clone());
        }
        self.live_children()
            .iter_mut()
            .find_map(|child| child.tracker_dependent())
    }

    fn finish(&mut self, reason: EndReason, ctx: &mut ExecutionContext) {
        let Activity::Active { since } = self.state else {
            return;
        };
        self.state = Activity::Done;
        let now = ctx.now();
        tracing::trace!(block = %self.name, ?reason, at = %now, "block finished");
        match &self.kind {
            BlockKind::Display {
                surface, duration, ..
            } => {
                ctx.outbox.push(PresentationCommand::Withdraw(surface.clone()));
                ctx.outbox
                    .push(PresentationCommand::Marker(format!("{}.OFFSET", self.name)));
                ctx.timings.push(BlockTiming {
                    block: self.name.clone(),
                    requested: *duration,
                    onset: ctx.rel(since),
                    offset: ctx.rel(now),
                    ended: reason,
                });
            }
            BlockKind::Wait { duration } => ctx.timings.push(BlockTiming {
                block: self.name.clone(),
                requested: Some(*duration),
                onset: ctx.rel(since),
                offset: ctx.rel(now),
                ended: reason,
            }),
            BlockKind::InputWait(_) if reason == EndReason::Cancelled => {
                ctx.outcomes.push(InputOutcome {
                    name: self.name.clone(),
                    onset: ctx.rel(since),
                    kind: OutcomeKind::Cancelled { at: ctx.rel(now) },
                    correct: None,
                });
            }
            _ => {}
        }
    }
}

fn advance_child(child: &mut Block, ctx: &mut ExecutionContext) -> Step {
    if child.is_idle() {
        child.activate(ctx);
    }
    child.advance(ctx)
}

fn advance_sequence(children: &mut [Block], current: &mut usize, ctx: &mut ExecutionContext) -> Step {
    while let Some(child) = children.get_mut(*current) {
        match advance_child(child, ctx) {
            Step::Done => *current += 1,
            step => return step,
        }
    }
    Step::Done
}

fn advance_loop(
    body: &mut Block,
    mode: &LoopMode,
    iteration: &mut u32,
    last_restart: &mut Option<Timestamp>,
    ctx: &mut ExecutionContext,
) -> Step {
    loop {
        if body.is_idle() {
            ctx.iteration = *iteration;
            let more = match mode {
                LoopMode::Count(n) => *iteration < *n,
                LoopMode::While(condition) => condition.evaluate(ctx),
            };
            if !more {
                return Step::Done;
            }
            // At most one restart per tick, so an instantaneous body cannot spin.
            if *last_restart == Some(ctx.now()) {
                return Step::Continue;
            }
            *last_restart = Some(ctx.now());
            body.activate(ctx);
        }
        match body.advance(ctx) {
            Step::Done => {
                *iteration += 1;
                body.reset();
            }
            step => return step,
        }
    }
}
