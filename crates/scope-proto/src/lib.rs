pub mod config;
pub mod doctor;

pub use config::{
    Color, ModelConfig, PipelineConfig, ResizeMode, SourceDescriptor, TrackingMode, CROP_AREA_COLOR,
    FPS_TEXT_COLOR, LABEL_TEXT_COLOR, MAX_BOX_THICKNESS, MERGED_COLOR,
};
