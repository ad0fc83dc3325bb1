use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use scope_proto::{Color, PipelineConfig, CROP_AREA_COLOR, FPS_TEXT_COLOR, LABEL_TEXT_COLOR, MAX_BOX_THICKNESS};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::crop::CropRegion;
use crate::overrides::{resolve, OverrideMaps};
use crate::Detection;

/// Pixel height of label text per unit of `font_size`.
pub const LABEL_PX_PER_FONT_UNIT: f32 = 24.0;
const LABEL_GAP: i32 = 5;
const FPS_FONT_SIZE: f32 = 1.5;
const FPS_ORIGIN: (i32, i32) = (20, 50);

/// Checked in order when no `font_path` is configured.
pub const SYSTEM_FONT_CANDIDATES: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

#[derive(Debug, Error)]
pub enum FontError {
    #[error("read font {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("not a usable TrueType/OpenType font: {}", path.display())]
    Invalid { path: PathBuf },
}

pub struct LabelFont {
    font: FontVec,
    path: PathBuf,
}

impl LabelFont {
    pub fn load(path: &Path) -> Result<Self, FontError> {
        let data = std::fs::read(path).map_err(|source| FontError::Io { path: path.to_path_buf(), source })?;
        let font = FontVec::try_from_vec(data).map_err(|_| FontError::Invalid { path: path.to_path_buf() })?;
        Ok(Self { font, path: path.to_path_buf() })
    }

    /// `explicit` when given, else the first loadable system font.
    pub fn discover(explicit: Option<&Path>) -> Result<Option<Self>, FontError> {
        if let Some(p) = explicit {
            return Self::load(p).map(Some);
        }
        for cand in SYSTEM_FONT_CANDIDATES {
            let p = Path::new(cand);
            if !p.exists() {
                continue;
            }
            match Self::load(p) {
                Ok(f) => {
                    info!("render: using font {}", p.display());
                    return Ok(Some(f));
                }
                Err(e) => debug!("render: skipping font candidate: {}", e),
            }
        }
        Ok(None)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Label for one detection, e.g. `ID:4 forklift 0.87` or `MERGED pallet 0.80`.
pub fn label_text(det: &Detection, name: &str) -> String {
    if det.is_merged {
        return format!("MERGED {} {:.2}", name, det.confidence);
    }
    match det.track_id {
        Some(id) => format!("ID:{} {} {:.2}", id, name, det.confidence),
        None => format!("{} {:.2}", name, det.confidence),
    }
}

/// Draws detections onto frames in place. Without a font only boxes are drawn.
pub struct Renderer {
    font: Option<LabelFont>,
}

impl Renderer {
    pub fn new(font: Option<LabelFont>) -> Self {
        Self { font }
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// `offset` moves boxes from detector-input space into the frame
    /// (the crop origin, or zero).
    pub fn render(
        &self,
        frame: &mut RgbImage,
        detections: &[Detection],
        maps: &OverrideMaps,
        cfg: &PipelineConfig,
        offset: (i32, i32),
    ) {
        for det in detections {
            let (name, color) = resolve(det, maps, cfg);
            let x1 = det.bbox.x1 as i32 + offset.0;
            let y1 = det.bbox.y1 as i32 + offset.1;
            let x2 = det.bbox.x2 as i32 + offset.0;
            let y2 = det.bbox.y2 as i32 + offset.1;
            draw_box(frame, (x1, y1, x2, y2), cfg.box_thickness, Rgb(color));

            if !cfg.display_id {
                continue;
            }
            let Some(font) = &self.font else { continue };
            let text = label_text(det, name);
            draw_label(frame, font, &text, (x1, y1), color, cfg.font_size);
        }
    }

    pub fn draw_crop_area(&self, frame: &mut RgbImage, region: CropRegion) {
        let (x, y) = region.offset();
        let s = region.size as i32;
        draw_box(frame, (x, y, x + s, y + s), 2, Rgb(CROP_AREA_COLOR));
    }

    pub fn draw_fps(&self, frame: &mut RgbImage, fps: u32) {
        let Some(font) = &self.font else { return };
        let text = format!("FPS: {}", fps);
        let scale = PxScale::from(FPS_FONT_SIZE * LABEL_PX_PER_FONT_UNIT);
        let (_, th) = text_size(scale, &font.font, &text);
        let y = (FPS_ORIGIN.1 - th as i32).max(0);
        draw_text_mut(frame, Rgb(FPS_TEXT_COLOR), FPS_ORIGIN.0, y, scale, &font.font, &text);
    }
}

/// `thickness` nested one-pixel outlines centered on the box edge, clamped to
/// `1..=MAX_BOX_THICKNESS`.
fn draw_box(frame: &mut RgbImage, (x1, y1, x2, y2): (i32, i32, i32, i32), thickness: u32, color: Rgb<u8>) {
    let (l, r) = (x1.min(x2), x1.max(x2));
    let (t, b) = (y1.min(y2), y1.max(y2));
    let lines = thickness.clamp(1, MAX_BOX_THICKNESS) as i32;
    let inside = (lines - 1) / 2;
    for k in 0..lines {
        let grow = k - inside;
        let w = r - l + 1 + 2 * grow;
        let h = b - t + 1 + 2 * grow;
        if w < 1 || h < 1 {
            continue;
        }
        draw_hollow_rect_mut(frame, Rect::at(l - grow, t - grow).of_size(w as u32, h as u32), color);
    }
}

// Filled background above the box, then the text. Only the top is clamped.
fn draw_label(frame: &mut RgbImage, font: &LabelFont, text: &str, (x, box_top): (i32, i32), bg: Color, font_size: f32) {
    let scale = PxScale::from((font_size * LABEL_PX_PER_FONT_UNIT).max(1.0));
    let (tw, th) = text_size(scale, &font.font, text);
    let top = (box_top - th as i32 - LABEL_GAP).max(0);
    let height = (box_top - top).max(1) as u32;
    draw_filled_rect_mut(frame, Rect::at(x, top).of_size(tw.max(1), height), Rgb(bg));
    draw_text_mut(frame, Rgb(LABEL_TEXT_COLOR), x, top, scale, &font.font, text);
}
