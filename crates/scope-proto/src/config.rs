use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// RGB byte triple.
pub type Color = [u8; 3];

/// Color of boxes produced by cross-model fusion.
pub const MERGED_COLOR: Color = [255, 0, 255];
pub const LABEL_TEXT_COLOR: Color = [0, 0, 0];
pub const CROP_AREA_COLOR: Color = [255, 0, 0];
pub const FPS_TEXT_COLOR: Color = [0, 255, 0];

/// Thickest box outline drawn; larger settings are rejected or clamped.
pub const MAX_BOX_THICKNESS: u32 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackingMode {
    #[default]
    Predict,
    /// ByteTrack association.
    Track,
    Botsort,
}

impl TrackingMode {
    pub fn is_tracking(self) -> bool {
        self != TrackingMode::Predict
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ResizeMode {
    /// Hand the full frame to the detector and let it scale.
    #[default]
    Scale,
    /// Center-crop a `yolo_input_size` square out of larger frames.
    Crop,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub path: PathBuf,
    #[serde(default = "default_model_color")]
    pub color: Color,
    /// Per-model confidence, used only when `per_model_conf` is on.
    #[serde(default)]
    pub conf: Option<f32>,
}

fn default_model_color() -> Color {
    [0, 255, 0]
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceDescriptor {
    Webcam(u32),
    Path(PathBuf),
}

/// Flat snapshot of every tunable. Replaced wholesale, never patched in place
/// while a pipeline is reading it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub models: Vec<ModelConfig>,

    // source
    pub video_path: String,
    pub use_webcam: bool,
    pub webcam_id: u32,

    // detection
    pub conf_threshold: f32,
    pub per_model_conf: bool,
    pub iou_threshold: f32,
    pub detections_per_second: u32,
    pub tracking_mode: TrackingMode,
    pub dual_processing: bool,
    pub yolo_input_size: u32,
    pub resize_mode: ResizeMode,

    // drawing
    pub display_id: bool,
    pub box_thickness: u32,
    pub font_size: f32,
    pub font_path: Option<PathBuf>,
    pub show_crop_area: bool,
    pub show_fps: bool,

    // overrides
    pub override_enabled: bool,
    pub override_text: String,
    pub override_color_enabled: bool,
    pub override_color_text: String,

    // fusion
    pub combine_bboxes: bool,
    pub combine_iou_threshold: f32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            models: Vec::new(),
            video_path: String::new(),
            use_webcam: false,
            webcam_id: 0,
            conf_threshold: 0.25,
            per_model_conf: false,
            iou_threshold: 0.5,
            detections_per_second: 10,
            tracking_mode: TrackingMode::Predict,
            dual_processing: false,
            yolo_input_size: 640,
            resize_mode: ResizeMode::Scale,
            display_id: true,
            box_thickness: 2,
            font_size: 0.6,
            font_path: None,
            show_crop_area: false,
            show_fps: true,
            override_enabled: false,
            override_text: String::new(),
            override_color_enabled: false,
            override_color_text: String::new(),
            combine_bboxes: false,
            combine_iou_threshold: 0.6,
        }
    }
}

impl PipelineConfig {
    pub fn source(&self) -> SourceDescriptor {
        if self.use_webcam {
            SourceDescriptor::Webcam(self.webcam_id)
        } else {
            SourceDescriptor::Path(PathBuf::from(&self.video_path))
        }
    }

    /// Confidence handed to a model's detector for this snapshot.
    pub fn effective_conf(&self, model: &ModelConfig) -> f32 {
        if self.per_model_conf {
            model.conf.unwrap_or(self.conf_threshold)
        } else {
            self.conf_threshold
        }
    }

    /// New snapshot with every live-tunable field taken from `edited`.
    ///
    /// Models, source and tracking mode pick which collaborators get loaded, so
    /// they stay as they were when the session started.
    pub fn with_live_fields_from(&self, edited: &PipelineConfig) -> PipelineConfig {
        PipelineConfig {
            models: self.models.clone(),
            video_path: self.video_path.clone(),
            use_webcam: self.use_webcam,
            webcam_id: self.webcam_id,
            tracking_mode: self.tracking_mode,
            ..edited.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let cfg: PipelineConfig = toml::from_str("").unwrap();
        assert_eq!(cfg, PipelineConfig::default());
        assert_eq!(cfg.tracking_mode, TrackingMode::Predict);
        assert_eq!(cfg.resize_mode, ResizeMode::Scale);
    }

    #[test]
    fn parses_models_and_modes() {
        let cfg: PipelineConfig = toml::from_str(
            r#"
            tracking_mode = "botsort"
            resize_mode = "Crop"
            per_model_conf = true

            [[models]]
            path = "a.json"
            color = [255, 0, 0]
            conf = 0.4

            [[models]]
            path = "b.json"
            "#,
        )
        .unwrap();

        assert!(cfg.tracking_mode.is_tracking());
        assert_eq!(cfg.resize_mode, ResizeMode::Crop);
        assert_eq!(cfg.models.len(), 2);
        assert_eq!(cfg.models[1].color, [0, 255, 0]);
        assert_eq!(cfg.effective_conf(&cfg.models[0]), 0.4);
        assert_eq!(cfg.effective_conf(&cfg.models[1]), 0.25);
    }

    #[test]
    fn global_conf_wins_without_per_model_flag() {
        let cfg = PipelineConfig { conf_threshold: 0.1, ..Default::default() };
        let model = ModelConfig { path: "m".into(), color: [1, 2, 3], conf: Some(0.9) };
        assert_eq!(cfg.effective_conf(&model), 0.1);
    }

    #[test]
    fn live_fields_keep_session_fields() {
        let running = PipelineConfig {
            video_path: "in.mp4".into(),
            tracking_mode: TrackingMode::Track,
            ..Default::default()
        };
        let edited = PipelineConfig {
            video_path: "other.mp4".into(),
            tracking_mode: TrackingMode::Predict,
            conf_threshold: 0.75,
            combine_bboxes: true,
            ..Default::default()
        };

        let next = running.with_live_fields_from(&edited);
        assert_eq!(next.video_path, "in.mp4");
        assert_eq!(next.tracking_mode, TrackingMode::Track);
        assert_eq!(next.conf_threshold, 0.75);
        assert!(next.combine_bboxes);
    }

    #[test]
    fn source_descriptor_follows_webcam_flag() {
        let mut cfg = PipelineConfig { video_path: "clip.mp4".into(), ..Default::default() };
        assert_eq!(cfg.source(), SourceDescriptor::Path("clip.mp4".into()));
        cfg.use_webcam = true;
        cfg.webcam_id = 2;
        assert_eq!(cfg.source(), SourceDescriptor::Webcam(2));
    }
}
