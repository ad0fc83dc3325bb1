//! Detector that serves recorded detections from a JSON file.
//!
//! ```json
//! {
//!   "names": { "0": "person", "2": "pallet" },
//!   "frames": [
//!     { "frame": 3, "boxes": [ { "xyxy": [10, 20, 110, 220], "conf": 0.91, "cls": 0 } ] },
//!     { "frame": 3, "polarity": "inverted", "boxes": [ { "xyxy": [12, 20, 108, 219], "conf": 0.55, "cls": 0, "id": 4 } ] }
//!   ]
//! }
//! ```
//!
//! Boxes are keyed by frame index and polarity. Recorded `id`s are served in
//! tracking mode; recordings without ids get identities from an [`IouTracker`],
//! one per polarity so the inverted pass never steals ids from the normal one.

use image::RgbImage;
use scope_proto::ModelConfig;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::info;

use crate::detector::{DetectRequest, Detector, DetectorError, ModelLoader, Polarity, Slot};
use crate::tracker::{IouTracker, TrackerConfig};
use crate::{Bbox, RawBox};

#[derive(Debug, Deserialize)]
struct ReplayFile {
    #[serde(default)]
    names: BTreeMap<i32, String>,
    #[serde(default)]
    frames: Vec<ReplayFrame>,
}

#[derive(Debug, Deserialize)]
struct ReplayFrame {
    frame: u64,
    #[serde(default)]
    polarity: Polarity,
    #[serde(default)]
    boxes: Vec<ReplayBox>,
}

#[derive(Debug, Clone, Deserialize)]
struct ReplayBox {
    xyxy: [f32; 4],
    conf: f32,
    cls: i32,
    #[serde(default)]
    id: Option<i64>,
}

pub struct ReplayDetector {
    names: BTreeMap<i32, String>,
    frames: HashMap<(u64, Polarity), Vec<ReplayBox>>,
    trackers: HashMap<Polarity, IouTracker>,
}

impl ReplayDetector {
    pub fn open(path: &Path) -> Result<Self, DetectorError> {
        let s = std::fs::read_to_string(path)
            .map_err(|source| DetectorError::Io { path: path.to_path_buf(), source })?;
        let file: ReplayFile = serde_json::from_str(&s)
            .map_err(|source| DetectorError::Replay { path: path.to_path_buf(), source })?;

        let mut frames: HashMap<(u64, Polarity), Vec<ReplayBox>> = HashMap::new();
        for f in file.frames {
            frames.entry((f.frame, f.polarity)).or_default().extend(f.boxes);
        }
        info!("replay: loaded {} ({} recorded frames, {} classes)", path.display(), frames.len(), file.names.len());
        Ok(Self { names: file.names, frames, trackers: HashMap::new() })
    }

    fn class_name(&self, cls: i32) -> String {
        self.names.get(&cls).cloned().unwrap_or_else(|| "unknown".to_string())
    }
}

impl Detector for ReplayDetector {
    fn detect(&mut self, _image: &RgbImage, req: &DetectRequest) -> Result<Vec<RawBox>, DetectorError> {
        let recorded: Vec<ReplayBox> = self
            .frames
            .get(&(req.frame_index, req.polarity))
            .map(|b| b.iter().filter(|b| b.conf >= req.confidence).cloned().collect())
            .unwrap_or_default();

        let ids: Vec<Option<i64>> = match req.tracker {
            None => vec![None; recorded.len()],
            Some(_) if recorded.iter().any(|b| b.id.is_some()) => recorded.iter().map(|b| b.id).collect(),
            Some(_) => {
                let tracker = self
                    .trackers
                    .entry(req.polarity)
                    .or_insert_with(|| IouTracker::new(TrackerConfig::default()));
                let input: Vec<(Bbox, i32)> = recorded.iter().map(|b| (Bbox::from_xyxy(b.xyxy), b.cls)).collect();
                tracker.update(&input)
            }
        };

        Ok(recorded
            .into_iter()
            .zip(ids)
            .map(|(b, track_id)| RawBox {
                bbox: Bbox::from_xyxy(b.xyxy),
                confidence: b.conf,
                class_id: b.cls,
                class_name: self.class_name(b.cls),
                track_id,
            })
            .collect())
    }
}

/// Loads every model path as a replay recording. Each slot gets its own
/// instance so tracker state is never shared with the stateless one.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReplayLoader;

impl ModelLoader for ReplayLoader {
    fn load(&self, model: &ModelConfig, slot: Slot) -> Result<Box<dyn Detector>, DetectorError> {
        if let Slot::Tracking(kind) = slot {
            info!("replay: tracking instance for {} ({})", model.path.display(), kind.config_name());
        }
        Ok(Box::new(ReplayDetector::open(&model.path)?))
    }
}
