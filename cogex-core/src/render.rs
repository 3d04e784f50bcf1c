use crate::stimulus::Surface;
use cogex_timing::Timestamp;

/// Presentation backend driven by the scheduler.
///
/// `present` and `withdraw` stage changes; they become visible on the next
/// `frame_tick`, which blocks until the frame boundary and returns its time.
pub trait Renderer {
    fn present(&mut self, surface: &Surface);

    fn withdraw(&mut self, surface: &Surface);

    fn frame_tick(&mut self) -> Timestamp;
}

impl<R: Renderer + ?Sized> Renderer for Box<R> {
    fn present(&mut self, surface: &Surface) {
        (**self).present(surface)
    }

    fn withdraw(&mut self, surface: &Surface) {
        (**self).withdraw(surface)
    }

    fn frame_tick(&mut self) -> Timestamp {
        (**self).frame_tick()
    }
}
