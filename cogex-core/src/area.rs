use crate::event::GazePoint;
use serde::{Deserialize, Serialize};

/// Screen region in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Shape {
    /// Half-open on the right and bottom edges.
    Rect {
        left: f32,
        top: f32,
        right: f32,
        bottom: f32,
    },
    Ellipse {
        cx: f32,
        cy: f32,
        rx: f32,
        ry: f32,
    },
}

impl Shape {
    pub fn rect(left: f32, top: f32, width: f32, height: f32) -> Self {
        Shape::Rect {
            left,
            top,
            right: left + width,
            bottom: top + height,
        }
    }

    /// Ellipse inscribed in the given bounding box.
    pub fn ellipse(left: f32, top: f32, width: f32, height: f32) -> Self {
        Shape::Ellipse {
            cx: left + width / 2.0,
            cy: top + height / 2.0,
            rx: width / 2.0,
            ry: height / 2.0,
        }
    }

    pub fn contains(&self, p: GazePoint) -> bool {
        match *self {
            Shape::Rect {
                left,
                top,
                right,
                bottom,
            } => p.x >= left && p.x < right && p.y >= top && p.y < bottom,
            Shape::Ellipse { cx, cy, rx, ry } => {
                if rx <= 0.0 || ry <= 0.0 {
                    return false;
                }
                let dx = (p.x - cx) / rx;
                let dy = (p.y - cy) / ry;
                dx * dx + dy * dy <= 1.0
            }
        }
    }

    /// Bounding box as `(left, top, right, bottom)`.
    pub fn bounds(&self) -> (f32, f32, f32, f32) {
        match *self {
            Shape::Rect {
                left,
                top,
                right,
                bottom,
            } => (left, top, right, bottom),
            Shape::Ellipse { cx, cy, rx, ry } => (cx - rx, cy - ry, cx + rx, cy + ry),
        }
    }

    fn tracker_name(&self) -> &'static str {
        match self {
            Shape::Rect { .. } => "RECTANGLE",
            Shape::Ellipse { .. } => "ELLIPSE",
        }
    }
}

/// A labelled region used for gaze-contingent predicates and for
/// reporting regions to the tracker's data viewer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterestArea {
    pub shape: Shape,
    pub label: String,
}

impl InterestArea {
    pub fn new(shape: Shape, label: impl Into<String>) -> Self {
        Self {
            shape,
            label: label.into(),
        }
    }

    pub fn contains(&self, p: GazePoint) -> bool {
        self.shape.contains(p)
    }

    /// Data viewer interest-area message, e.g. `!V IAREA RECTANGLE 1 10 10 50 50 target`.
    pub fn viewer_message(&self, index: usize) -> String {
        let (l, t, r, b) = self.shape.bounds();
        format!(
            "!V IAREA {} {} {} {} {} {} {}",
            self.shape.tracker_name(),
            index,
            l.round() as i64,
            t.round() as i64,
            r.round() as i64,
            b.round() as i64,
            self.label
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rect_is_half_open() {
        let r = Shape::rect(0.0, 0.0, 10.0, 10.0);
        assert!(r.contains(GazePoint::new(0.0, 0.0)));
        assert!(r.contains(GazePoint::new(9.9, 9.9)));
        assert!(!r.contains(GazePoint::new(10.0, 5.0)));
    }

    #[test]
    fn ellipse_uses_normalized_radius() {
        let e = Shape::ellipse(0.0, 0.0, 20.0, 10.0);
        assert!(e.contains(GazePoint::new(10.0, 5.0)));
        assert!(e.contains(GazePoint::new(20.0, 5.0)));
        assert!(!e.contains(GazePoint::new(19.0, 9.0)));
    }

    #[test]
    fn viewer_message_lists_bounds() {
        let area = InterestArea::new(Shape::rect(10.0, 20.0, 30.0, 40.0), "target");
        assert_eq!(area.viewer_message(1), "!V IAREA RECTANGLE 1 10 20 40 60 target");
    }
}
