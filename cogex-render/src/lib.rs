//! tiny-skia backend for the presentation side of a session: stimulus
//! sprites, a compositing [`PixmapRenderer`] and the [`FramePacer`] that
//! decides when a frame flips.

pub mod pacer;
pub mod render;
pub mod sprite;

pub use pacer::FramePacer;
pub use render::PixmapRenderer;
pub use sprite::{render_stimulus, sprite_size};
