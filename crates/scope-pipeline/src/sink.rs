use image::imageops::FilterType;
use image::RgbImage;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::SinkError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkControl {
    Continue,
    /// Stop the pipeline after this frame.
    Quit,
}

pub trait FrameSink: Send {
    fn present(&mut self, frame: &RgbImage) -> Result<SinkControl, SinkError>;
}

/// Writes every presented frame as `frame_000001.png`, `frame_000002.png`, ...
pub struct DirSink {
    dir: PathBuf,
    written: u64,
    resize: Option<(u32, u32)>,
    limit: Option<u64>,
}

impl DirSink {
    pub fn create(dir: &Path) -> Result<Self, SinkError> {
        std::fs::create_dir_all(dir).map_err(|source| SinkError::Io { path: dir.to_path_buf(), source })?;
        Ok(Self { dir: dir.to_path_buf(), written: 0, resize: None, limit: None })
    }

    /// Rescale frames to a fixed viewer size before writing.
    pub fn with_resize(mut self, width: u32, height: u32) -> Self {
        self.resize = Some((width, height));
        self
    }

    /// Ask to quit once `frames` have been written.
    pub fn with_limit(mut self, frames: u64) -> Self {
        self.limit = Some(frames);
        self
    }

    pub fn written(&self) -> u64 {
        self.written
    }
}

impl FrameSink for DirSink {
    fn present(&mut self, frame: &RgbImage) -> Result<SinkControl, SinkError> {
        self.written += 1;
        let path = self.dir.join(format!("frame_{:06}.png", self.written));
        let saved = match self.resize {
            Some((w, h)) if frame.dimensions() != (w, h) => {
                image::imageops::resize(frame, w, h, FilterType::Triangle).save(&path)
            }
            _ => frame.save(&path),
        };
        saved.map_err(|source| SinkError::Image { path, source })?;

        if self.limit.is_some_and(|n| self.written >= n) {
            info!("sink: frame limit {} reached", self.written);
            return Ok(SinkControl::Quit);
        }
        Ok(SinkControl::Continue)
    }
}

/// Discards frames.
#[derive(Debug, Default)]
pub struct NullSink {
    pub presented: u64,
}

impl FrameSink for NullSink {
    fn present(&mut self, _frame: &RgbImage) -> Result<SinkControl, SinkError> {
        self.presented += 1;
        Ok(SinkControl::Continue)
    }
}
