use crate::pacer::FramePacer;
use crate::sprite::render_stimulus;
use anyhow::{Context, Result};
use cogex_core::{Renderer, StimulusType, Surface, SurfaceId, Timestamp};
use cogex_timing::{FrameStats, FrameTimer};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tiny_skia::{Color, Paint, Pixmap, PixmapPaint, Rect, Transform};
use tracing::{debug, trace};

enum Change {
    Present(Surface),
    Withdraw(SurfaceId),
}

struct Placed {
    surface: Surface,
    sprite: Option<Arc<Pixmap>>,
    origin: (i32, i32),
}

impl Placed {
    fn bounds(&self) -> Option<Rect> {
        let sprite = self.sprite.as_ref()?;
        Rect::from_xywh(
            self.origin.0 as f32,
            self.origin.1 as f32,
            sprite.width() as f32,
            sprite.height() as f32,
        )
    }
}

/// Software renderer compositing surfaces onto a tiny-skia canvas.
///
/// Changes staged with `present`/`withdraw` are composed at the next
/// `frame_tick`, which then waits on its [`FramePacer`] for the flip.
/// Surfaces stack in presentation order.
pub struct PixmapRenderer {
    width: u32,
    height: u32,
    canvas: Pixmap,
    background: Color,
    visible: Vec<Placed>,
    staged: Vec<Change>,
    sprites: HashMap<SurfaceId, (StimulusType, Arc<Pixmap>)>,
    dirty: Vec<Rect>,
    pacer: FramePacer,
    compose_timer: FrameTimer,
    frames: u64,
    last_flip: Option<Timestamp>,
}

impl PixmapRenderer {
    pub fn new(width: u32, height: u32, pacer: FramePacer) -> Result<Self> {
        let background = Color::from_rgba8(0, 0, 0, 255);
        let mut canvas = Pixmap::new(width, height)
            .with_context(|| format!("cannot allocate a {width}x{height} canvas"))?;
        canvas.fill(background);
        Ok(Self {
            width,
            height,
            canvas,
            background,
            visible: Vec::new(),
            staged: Vec::new(),
            sprites: HashMap::new(),
            dirty: Vec::with_capacity(16),
            pacer,
            compose_timer: FrameTimer::new(600),
            frames: 0,
            last_flip: None,
        })
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn canvas(&self) -> &Pixmap {
        &self.canvas
    }

    /// Straight RGBA of one canvas pixel.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        let p = self.canvas.pixel(x, y)?.demultiply();
        Some([p.red(), p.green(), p.blue(), p.alpha()])
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn last_flip(&self) -> Option<Timestamp> {
        self.last_flip
    }

    pub fn visible_ids(&self) -> Vec<SurfaceId> {
        self.visible.iter().map(|p| p.surface.id).collect()
    }

    /// Time spent composing frames, excluding the wait for the flip.
    pub fn compose_stats(&self) -> FrameStats {
        self.compose_timer.stats()
    }

    pub fn save_png(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.canvas
            .save_png(path)
            .with_context(|| format!("writing frame to {}", path.display()))
    }

    fn sprite_for(&mut self, surface: &Surface) -> Option<Arc<Pixmap>> {
        if let Some((stimulus, sprite)) = self.sprites.get(&surface.id) {
            if *stimulus == surface.stimulus {
                return Some(Arc::clone(sprite));
            }
        }
        let sprite = Arc::new(render_stimulus(&surface.stimulus)?);
        self.sprites
            .insert(surface.id, (surface.stimulus.clone(), Arc::clone(&sprite)));
        Some(sprite)
    }

    fn place(&mut self, surface: Surface) -> Placed {
        let sprite = self.sprite_for(&surface);
        let origin = match &sprite {
            Some(s) => (
                (surface.position.0 * self.width as f32 - s.width() as f32 / 2.0).round() as i32,
                (surface.position.1 * self.height as f32 - s.height() as f32 / 2.0).round()
                    as i32,
            ),
            None => (0, 0),
        };
        Placed {
            surface,
            sprite,
            origin,
        }
    }

    fn take_visible(&mut self, id: SurfaceId) {
        if let Some(i) = self.visible.iter().position(|p| p.surface.id == id) {
            let old = self.visible.remove(i);
            self.dirty.extend(old.bounds());
        }
    }

    fn apply_staged(&mut self) -> bool {
        if self.staged.is_empty() {
            return false;
        }
        for change in std::mem::take(&mut self.staged) {
            match change {
                Change::Present(surface) => {
                    self.take_visible(surface.id);
                    let placed = self.place(surface);
                    self.dirty.extend(placed.bounds());
                    self.visible.push(placed);
                }
                Change::Withdraw(id) => self.take_visible(id),
            }
        }
        true
    }

    fn compose(&mut self) {
        coalesce_dirty(&mut self.dirty);
        let mut clear = Paint::default();
        clear.set_color(self.background);
        for rect in self.dirty.drain(..) {
            self.canvas
                .fill_rect(rect, &clear, Transform::identity(), None);
        }
        for placed in &self.visible {
            if let Some(sprite) = &placed.sprite {
                self.canvas.draw_pixmap(
                    placed.origin.0,
                    placed.origin.1,
                    (**sprite).as_ref(),
                    &PixmapPaint::default(),
                    Transform::identity(),
                    None,
                );
            }
        }
    }
}

impl Renderer for PixmapRenderer {
    fn present(&mut self, surface: &Surface) {
        trace!(surface = %surface.id, label = %surface.label, "present staged");
        self.staged.push(Change::Present(surface.clone()));
    }

    fn withdraw(&mut self, surface: &Surface) {
        trace!(surface = %surface.id, "withdraw staged");
        self.staged.push(Change::Withdraw(surface.id));
    }

    fn frame_tick(&mut self) -> Timestamp {
        let started = Instant::now();
        if self.apply_staged() {
            self.compose();
        }
        self.compose_timer.record_frame(started.elapsed());
        let flip = self.pacer.wait_frame();
        self.frames += 1;
        self.last_flip = Some(flip);
        if self.frames % 600 == 0 {
            debug!(frames = self.frames, at = %flip, "frame");
        }
        flip
    }
}

// Merges rects on the same row that touch or overlap.
fn coalesce_dirty(rects: &mut Vec<Rect>) {
    rects.sort_by(|a, b| a.y().total_cmp(&b.y()).then(a.x().total_cmp(&b.x())));
    let mut out: Vec<Rect> = Vec::with_capacity(rects.len());
    for r in rects.drain(..) {
        if let Some(last) = out.last_mut() {
            let same_row =
                (r.y() - last.y()).abs() < 1.0 && (r.height() - last.height()).abs() < 1.0;
            let touching = r.x() <= last.right() + 1.0;
            if same_row && touching {
                let left = last.x().min(r.x());
                let right = last.right().max(r.right());
                if let Some(merged) = Rect::from_ltrb(left, last.y(), right, last.bottom()) {
                    *last = merged;
                    continue;
                }
            }
        }
        out.push(r);
    }
    *rects = out;
}
