use cogex_core::{Renderer, Surface, SurfaceId, Timestamp};
use cogex_timing::SimClock;
use std::time::Duration;

/// What a [`SimRenderer`] was asked to do, with the frame it applied to.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderOp {
    Present(SurfaceId, Timestamp),
    Withdraw(SurfaceId, Timestamp),
}

/// Headless renderer for deterministic runs: every `frame_tick` advances a
/// shared [`SimClock`] by one frame interval.
///
/// Staged changes are stamped with the frame that makes them visible.
#[derive(Debug)]
pub struct SimRenderer {
    clock: SimClock,
    interval: Duration,
    visible: Vec<Surface>,
    staged: Vec<(bool, Surface)>,
    log: Vec<RenderOp>,
    frames: u64,
}

impl SimRenderer {
    pub fn new(clock: SimClock, interval: Duration) -> Self {
        Self {
            clock,
            interval,
            visible: Vec::new(),
            staged: Vec::new(),
            log: Vec::new(),
            frames: 0,
        }
    }

    pub fn clock(&self) -> &SimClock {
        &self.clock
    }

    pub fn visible(&self) -> &[Surface] {
        &self.visible
    }

    pub fn log(&self) -> &[RenderOp] {
        &self.log
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Flip time of the frame that first showed `id`.
    pub fn onset_of(&self, id: SurfaceId) -> Option<Timestamp> {
        self.log.iter().find_map(|op| match op {
            RenderOp::Present(s, at) if *s == id => Some(*at),
            _ => None,
        })
    }
}

impl Renderer for SimRenderer {
    fn present(&mut self, surface: &Surface) {
        self.staged.push((true, surface.clone()));
    }

    fn withdraw(&mut self, surface: &Surface) {
        self.staged.push((false, surface.clone()));
    }

    fn frame_tick(&mut self) -> Timestamp {
        let now = self.clock.advance(self.interval);
        self.frames += 1;
        for (show, surface) in self.staged.drain(..) {
            if show {
                self.log.push(RenderOp::Present(surface.id, now));
                self.visible.push(surface);
            } else {
                self.log.push(RenderOp::Withdraw(surface.id, now));
                self.visible.retain(|s| s.id != surface.id);
            }
        }
        now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cogex_core::StimulusType;

    #[test]
    fn staged_changes_land_on_the_next_frame() {
        let clock = SimClock::new();
        let mut renderer = SimRenderer::new(clock.clone(), Duration::from_millis(10));
        let surface = Surface::new(SurfaceId(7), "cross", StimulusType::fixation());
        renderer.present(&surface);
        assert!(renderer.visible().is_empty());
        assert_eq!(renderer.frame_tick(), Timestamp::from_millis(10));
        assert_eq!(renderer.visible().len(), 1);
        renderer.withdraw(&surface);
        renderer.frame_tick();
        assert!(renderer.visible().is_empty());
        assert_eq!(
            renderer.log(),
            &[
                RenderOp::Present(SurfaceId(7), Timestamp::from_millis(10)),
                RenderOp::Withdraw(SurfaceId(7), Timestamp::from_millis(20)),
            ]
        );
        assert_eq!(renderer.onset_of(SurfaceId(7)), Some(Timestamp::from_millis(10)));
    }
}
