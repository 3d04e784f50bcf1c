use cogex_core::{ArrowDirection, StimulusType};
use tiny_skia::{Color, FillRule, Paint, PathBuilder, Pixmap, Rect, Transform};

// Text placeholders assume glyphs advance 3/5 of the font size.
const TEXT_ADVANCE: (f32, f32) = (3.0, 5.0);

fn paint_of(color: [u8; 4]) -> Paint<'static> {
    let mut paint = Paint::default();
    paint.anti_alias = false;
    paint.set_color(Color::from_rgba8(color[0], color[1], color[2], color[3]));
    paint
}

/// Pixel extent of the sprite a stimulus rasterizes to.
pub fn sprite_size(stimulus: &StimulusType) -> (u32, u32) {
    match stimulus {
        StimulusType::Circle { radius, .. } => {
            let size = (radius * 2.0).ceil() as u32;
            (size, size)
        }
        StimulusType::Rectangle { width, height, .. } => {
            (width.ceil() as u32, height.ceil() as u32)
        }
        StimulusType::Arrow { size, .. } => {
            let size = (size * 2.0).ceil() as u32;
            (size, size)
        }
        StimulusType::Text { content, size, .. } => {
            let chars = content.chars().count().max(1) as f32;
            ((chars * size * TEXT_ADVANCE.0 / TEXT_ADVANCE.1).ceil() as u32, size.ceil() as u32)
        }
        StimulusType::FixationCross { size, .. } => {
            let size = (size * 2.0).ceil() as u32;
            (size, size)
        }
        StimulusType::Blank => (0, 0),
    }
}

/// Rasterizes a stimulus into its own transparent pixmap.
///
/// Returns `None` for [`StimulusType::Blank`] and for degenerate sizes.
/// Text has no font behind it and is drawn as an outlined box covering the
/// space the string would take.
pub fn render_stimulus(stimulus: &StimulusType) -> Option<Pixmap> {
    let (width, height) = sprite_size(stimulus);
    let mut pixmap = Pixmap::new(width, height)?;
    match stimulus {
        StimulusType::Circle { radius, color } => {
            let mut pb = PathBuilder::new();
            pb.push_circle(*radius, *radius, *radius);
            pixmap.fill_path(
                &pb.finish()?,
                &paint_of(*color),
                FillRule::Winding,
                Transform::identity(),
                None,
            );
        }
        StimulusType::Rectangle {
            width: w,
            height: h,
            color,
        } => {
            let rect = Rect::from_xywh(0.0, 0.0, *w, *h)?;
            pixmap.fill_rect(rect, &paint_of(*color), Transform::identity(), None);
        }
        StimulusType::Arrow {
            direction,
            size,
            color,
        } => {
            let (cx, cy, s) = (*size, *size, *size);
            let mut pb = PathBuilder::new();
            match direction {
                ArrowDirection::Right => {
                    pb.move_to(cx + s, cy);
                    pb.line_to(cx, cy - s);
                    pb.line_to(cx, cy + s);
                }
                ArrowDirection::Left => {
                    pb.move_to(cx - s, cy);
                    pb.line_to(cx, cy - s);
                    pb.line_to(cx, cy + s);
                }
                ArrowDirection::Up => {
                    pb.move_to(cx, cy - s);
                    pb.line_to(cx - s, cy);
                    pb.line_to(cx + s, cy);
                }
                ArrowDirection::Down => {
                    pb.move_to(cx, cy + s);
                    pb.line_to(cx - s, cy);
                    pb.line_to(cx + s, cy);
                }
            }
            pb.close();
            pixmap.fill_path(
                &pb.finish()?,
                &paint_of(*color),
                FillRule::Winding,
                Transform::identity(),
                None,
            );
        }
        StimulusType::Text { color, .. } => {
            let paint = paint_of(*color);
            let (w, h) = (width as f32, height as f32);
            let t = (h / 16.0).max(1.0);
            for edge in [
                Rect::from_xywh(0.0, 0.0, w, t),
                Rect::from_xywh(0.0, h - t, w, t),
                Rect::from_xywh(0.0, 0.0, t, h),
                Rect::from_xywh(w - t, 0.0, t, h),
            ] {
                pixmap.fill_rect(edge?, &paint, Transform::identity(), None);
            }
        }
        StimulusType::FixationCross { color, .. } => {
            // 2px bars spanning the full extent.
            let paint = paint_of(*color);
            let (w, h) = (width as f32, height as f32);
            let bar = Rect::from_xywh(0.0, (h - 2.0) * 0.5, w, 2.0)?;
            pixmap.fill_rect(bar, &paint, Transform::identity(), None);
            let bar = Rect::from_xywh((w - 2.0) * 0.5, 0.0, 2.0, h)?;
            pixmap.fill_rect(bar, &paint, Transform::identity(), None);
        }
        StimulusType::Blank => return None,
    }
    Some(pixmap)
}
