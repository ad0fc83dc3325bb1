mod geometry;
pub mod aggregate;
pub mod cadence;
pub mod crop;
pub mod detector;
pub mod fusion;
pub mod overrides;
pub mod render;
pub mod replay;
pub mod tracker;

pub use geometry::{iou, Bbox, IOU_EPS};

use scope_proto::Color;
use serde::{Deserialize, Serialize};

/// One box as reported by a detector collaborator, before the pipeline stamps
/// it with model metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawBox {
    pub bbox: Bbox,
    pub confidence: f32,
    pub class_id: i32,
    pub class_name: String,
    pub track_id: Option<i64>,
}

/// One observed or fused box for one frame.
///
/// Coordinates live in the detector input space (the crop, when cropping);
/// the renderer applies the crop offset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: Bbox,
    pub confidence: f32,
    pub class_id: i32,
    pub class_name: String,
    pub color: Color,
    // only meaningful inside the model instance that produced it
    pub track_id: Option<i64>,
    pub is_merged: bool,
}

impl Detection {
    pub fn from_raw(raw: RawBox, color: Color) -> Self {
        Self {
            bbox: raw.bbox,
            confidence: raw.confidence,
            class_id: raw.class_id,
            class_name: raw.class_name,
            color,
            track_id: raw.track_id,
            is_merged: false,
        }
    }

    /// Key used by the override maps: track id when present, class id otherwise.
    pub fn override_key(&self) -> i64 {
        self.track_id.unwrap_or(self.class_id as i64)
    }
}

/// Error and its sources on one line, `outer: inner: ...`.
pub fn error_chain(e: &dyn std::error::Error) -> String {
    let mut s = e.to_string();
    let mut cur = e.source();
    while let Some(inner) = cur {
        s.push_str(": ");
        s.push_str(&inner.to_string());
        cur = inner.source();
    }
    s
}
