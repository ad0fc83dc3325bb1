//! Runs every configured model on a frame and flattens the results.

use image::RgbImage;
use scope_proto::{Color, ModelConfig, PipelineConfig, TrackingMode};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::detector::{DetectRequest, Detector, ModelLoadError, ModelLoader, Polarity, Slot, TrackerKind};
use crate::{error_chain, Detection};

/// A loaded model: its settings plus a stateless and an optional tracking
/// instance. The tracking slot exists only when the session runs a tracker.
pub struct ModelEntry {
    config: ModelConfig,
    stateless: Box<dyn Detector>,
    tracking: Option<Box<dyn Detector>>,
}

impl ModelEntry {
    pub fn new(config: ModelConfig, stateless: Box<dyn Detector>, tracking: Option<Box<dyn Detector>>) -> Self {
        Self { config, stateless, tracking }
    }

    pub fn load(loader: &dyn ModelLoader, config: ModelConfig, mode: TrackingMode) -> Result<Self, ModelLoadError> {
        let wrap = |source| ModelLoadError { path: config.path.clone(), source };
        let stateless = loader.load(&config, Slot::Stateless).map_err(wrap)?;
        let tracking = match TrackerKind::for_mode(mode) {
            Some(kind) => Some(loader.load(&config, Slot::Tracking(kind)).map_err(wrap)?),
            None => None,
        };
        info!("aggregate: loaded model {} (tracking slot: {})", config.path.display(), tracking.is_some());
        Ok(Self { config, stateless, tracking })
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    pub fn color(&self) -> Color {
        self.config.color
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }
}

pub struct Aggregator {
    entries: Vec<ModelEntry>,
    mode: TrackingMode,
}

impl Aggregator {
    pub fn new(entries: Vec<ModelEntry>, mode: TrackingMode) -> Self {
        Self { entries, mode }
    }

    /// Loads every model; the first failure aborts with its path.
    pub fn load(loader: &dyn ModelLoader, models: &[ModelConfig], mode: TrackingMode) -> Result<Self, ModelLoadError> {
        let entries = models
            .iter()
            .map(|m| ModelEntry::load(loader, m.clone(), mode))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { entries, mode })
    }

    pub fn mode(&self) -> TrackingMode {
        self.mode
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Detections of every model (and the inverted pass, when enabled) for
    /// one frame, in model order. No deduplication happens here.
    ///
    /// A failing call is logged and skipped; the remaining models still run.
    pub fn aggregate(&mut self, input: &RgbImage, cfg: &PipelineConfig, frame_index: u64) -> Vec<Detection> {
        let inverted = cfg.dual_processing.then(|| invert(input));
        let tracker = TrackerKind::for_mode(self.mode);

        let mut out = Vec::new();
        for entry in &mut self.entries {
            let conf = cfg.effective_conf(&entry.config);
            let color = entry.config.color;
            let detector: &mut Box<dyn Detector> = match (tracker, entry.tracking.as_mut()) {
                (Some(_), Some(t)) => t,
                _ => &mut entry.stateless,
            };

            let passes = std::iter::once((Polarity::Normal, input))
                .chain(inverted.as_ref().map(|inv| (Polarity::Inverted, inv)));
            for (polarity, image) in passes {
                let req = DetectRequest {
                    frame_index,
                    polarity,
                    confidence: conf,
                    iou_threshold: cfg.iou_threshold,
                    input_size: cfg.yolo_input_size,
                    tracker,
                };
                match detector.detect(image, &req) {
                    Ok(boxes) => {
                        debug!(
                            "aggregate: frame={} model={} pass={:?} n={}",
                            frame_index,
                            entry.config.path.display(),
                            polarity,
                            boxes.len()
                        );
                        out.extend(boxes.into_iter().map(|mut b| {
                            if tracker.is_none() {
                                b.track_id = None;
                            }
                            Detection::from_raw(b, color)
                        }));
                    }
                    Err(e) => warn!(
                        "aggregate: model {} {:?} pass failed on frame {}, skipping: {}",
                        entry.config.path.display(),
                        polarity,
                        frame_index,
                        error_chain(&e)
                    ),
                }
            }
        }
        out
    }
}

/// Tonal inverse, every channel `255 - v`.
pub fn invert(image: &RgbImage) -> RgbImage {
    let mut out = image.clone();
    image::imageops::invert(&mut out);
    out
}
