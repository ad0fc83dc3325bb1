use anyhow::Result;
use crate::config::{PipelineConfig, ResizeMode, MAX_BOX_THICKNESS};

pub fn check_thresholds(cfg: &PipelineConfig) -> Result<()> {
    anyhow::ensure!((0.0..=1.0).contains(&cfg.conf_threshold), "conf_threshold must be within 0..1");
    anyhow::ensure!((0.0..=1.0).contains(&cfg.iou_threshold), "iou_threshold must be within 0..1");
    anyhow::ensure!(
        (0.0..=1.0).contains(&cfg.combine_iou_threshold),
        "combine_iou_threshold must be within 0..1"
    );
    for m in &cfg.models {
        if let Some(c) = m.conf {
            anyhow::ensure!((0.0..=1.0).contains(&c), "models[{}].conf must be within 0..1", m.path.display());
        }
    }
    Ok(())
}

pub fn check_models(cfg: &PipelineConfig) -> Result<()> {
    anyhow::ensure!(!cfg.models.is_empty(), "at least one model is required");
    for m in &cfg.models {
        anyhow::ensure!(m.path.exists(), "model file not found: {}", m.path.display());
    }
    Ok(())
}

pub fn check_source(cfg: &PipelineConfig) -> Result<()> {
    if !cfg.use_webcam {
        anyhow::ensure!(!cfg.video_path.is_empty(), "video_path missing (use_webcam=false)");
        anyhow::ensure!(
            std::path::Path::new(&cfg.video_path).exists(),
            "video source not found: {}",
            cfg.video_path
        );
    }
    Ok(())
}

pub fn check_drawing(cfg: &PipelineConfig) -> Result<()> {
    anyhow::ensure!(cfg.font_size > 0.0, "font_size must be positive");
    anyhow::ensure!(
        cfg.box_thickness <= MAX_BOX_THICKNESS,
        "box_thickness must be at most {}",
        MAX_BOX_THICKNESS
    );
    if cfg.resize_mode == ResizeMode::Crop {
        // multiples of 32 up to 3408 are what detectors accept
        anyhow::ensure!(
            cfg.yolo_input_size >= 32 && cfg.yolo_input_size % 32 == 0,
            "yolo_input_size should be a positive multiple of 32"
        );
    }
    Ok(())
}
