use serde::{Deserialize, Serialize};
use std::fmt;

/// Visual content of a display surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StimulusType {
    Circle {
        radius: f32,
        color: [u8; 4],
    },
    Rectangle {
        width: f32,
        height: f32,
        color: [u8; 4],
    },
    Arrow {
        direction: ArrowDirection,
        size: f32,
        color: [u8; 4],
    },
    Text {
        content: String,
        size: f32,
        color: [u8; 4],
    },
    FixationCross {
        size: f32,
        color: [u8; 4],
    },
    Blank,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArrowDirection {
    Up,
    Down,
    Left,
    Right,
}

impl StimulusType {
    pub fn is_text(&self) -> bool {
        matches!(self, StimulusType::Text { .. })
    }

    pub fn fixation() -> Self {
        StimulusType::FixationCross {
            size: 20.0,
            color: [255, 255, 255, 255],
        }
    }
}

/// Identifier the renderer uses to match a withdraw with its present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SurfaceId(pub u32);

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "surface#{}", self.0)
    }
}

/// Something a display block puts on screen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Surface {
    pub id: SurfaceId,
    pub label: String,
    pub stimulus: StimulusType,
    /// Centre, normalized to `[0, 1]` in both axes.
    pub position: (f32, f32),
}

impl Surface {
    pub fn new(id: SurfaceId, label: impl Into<String>, stimulus: StimulusType) -> Self {
        Self {
            id,
            label: label.into(),
            stimulus,
            position: (0.5, 0.5),
        }
    }

    pub fn at(mut self, x: f32, y: f32) -> Self {
        self.position = (x, y);
        self
    }
}
