//! Contract with detection/tracking collaborators.

use image::RgbImage;
use scope_proto::{ModelConfig, TrackingMode};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::RawBox;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Polarity {
    #[default]
    Normal,
    /// Tonally inverted copy of the frame (dual processing).
    Inverted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerKind {
    ByteTrack,
    BotSort,
}

impl TrackerKind {
    pub fn for_mode(mode: TrackingMode) -> Option<Self> {
        match mode {
            TrackingMode::Predict => None,
            TrackingMode::Track => Some(TrackerKind::ByteTrack),
            TrackingMode::Botsort => Some(TrackerKind::BotSort),
        }
    }

    pub fn config_name(self) -> &'static str {
        match self {
            TrackerKind::ByteTrack => "bytetrack.yaml",
            TrackerKind::BotSort => "botsort.yaml",
        }
    }
}

/// Which of a model's two instances a loader is building.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Stateless,
    Tracking(TrackerKind),
}

/// Per-call parameters.
#[derive(Debug, Clone)]
pub struct DetectRequest {
    pub frame_index: u64,
    pub polarity: Polarity,
    pub confidence: f32,
    pub iou_threshold: f32,
    pub input_size: u32,
    /// `Some` asks the instance to keep identities across calls.
    pub tracker: Option<TrackerKind>,
}

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("cannot load model {}: {reason}", path.display())]
    Load { path: PathBuf, reason: String },
    #[error("read {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse replay file {}", path.display())]
    Replay {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("inference failed: {0}")]
    Inference(String),
}

pub trait Detector: Send {
    fn detect(&mut self, image: &RgbImage, req: &DetectRequest) -> Result<Vec<RawBox>, DetectorError>;
}

pub trait ModelLoader: Send + Sync {
    fn load(&self, model: &ModelConfig, slot: Slot) -> Result<Box<dyn Detector>, DetectorError>;
}

#[derive(Debug, Error)]
#[error("failed to load model {}", path.display())]
pub struct ModelLoadError {
    pub path: PathBuf,
    #[source]
    pub source: DetectorError,
}
