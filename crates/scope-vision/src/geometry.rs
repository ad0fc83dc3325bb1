use serde::{Deserialize, Serialize};

/// Added to the IoU denominator so two empty boxes compare as 0, not NaN.
pub const IOU_EPS: f32 = 1e-6;

/// Axis-aligned box, corners in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Bbox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl Bbox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn from_xyxy(v: [f32; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    /// Area; inverted boxes count as empty.
    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    /// Smallest box containing both.
    pub fn union(&self, other: &Bbox) -> Bbox {
        Bbox {
            x1: self.x1.min(other.x1),
            y1: self.y1.min(other.y1),
            x2: self.x2.max(other.x2),
            y2: self.y2.max(other.y2),
        }
    }

    pub fn translate(&self, dx: f32, dy: f32) -> Bbox {
        Bbox { x1: self.x1 + dx, y1: self.y1 + dy, x2: self.x2 + dx, y2: self.y2 + dy }
    }
}

pub fn iou(a: &Bbox, b: &Bbox) -> f32 {
    let ix_a = a.x1.max(b.x1);
    let iy_a = a.y1.max(b.y1);
    let ix_b = a.x2.min(b.x2);
    let iy_b = a.y2.min(b.y2);

    let iw = (ix_b - ix_a).max(0.0);
    let ih = (iy_b - iy_a).max(0.0);
    let inter = iw * ih;
    inter / (a.area() + b.area() - inter + IOU_EPS)
}
