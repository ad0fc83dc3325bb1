use image::RgbImage;
use scope_proto::{PipelineConfig, ResizeMode};
use std::borrow::Cow;

/// Square region of the frame handed to detectors in crop mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRegion {
    pub x: u32,
    pub y: u32,
    pub size: u32,
}

impl CropRegion {
    pub fn offset(&self) -> (i32, i32) {
        (self.x as i32, self.y as i32)
    }
}

/// Centered `size` square, only when the frame is larger in both dimensions.
pub fn center_crop(width: u32, height: u32, size: u32) -> Option<CropRegion> {
    if size == 0 || width <= size || height <= size {
        return None;
    }
    Some(CropRegion { x: (width - size) / 2, y: (height - size) / 2, size })
}

/// Detector input for `frame` under `cfg`, with the crop that produced it.
pub fn prepare_input<'a>(frame: &'a RgbImage, cfg: &PipelineConfig) -> (Cow<'a, RgbImage>, Option<CropRegion>) {
    if cfg.resize_mode != ResizeMode::Crop {
        return (Cow::Borrowed(frame), None);
    }
    match center_crop(frame.width(), frame.height(), cfg.yolo_input_size) {
        Some(r) => {
            let sub = image::imageops::crop_imm(frame, r.x, r.y, r.size, r.size).to_image();
            (Cow::Owned(sub), Some(r))
        }
        None => (Cow::Borrowed(frame), None),
    }
}
