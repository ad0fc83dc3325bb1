use image::RgbImage;
use scope_proto::SourceDescriptor;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};
use tracing::{debug, info, warn};

use crate::error::{PipelineError, SourceError};

pub trait FrameSource: Send {
    /// Frames per second the source claims; 0 when unknown.
    fn nominal_fps(&self) -> f64;

    /// Next frame in acquisition order, `None` at end of stream.
    fn next_frame(&mut self) -> Result<Option<RgbImage>, SourceError>;
}

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp"];

/// Still images of one directory, in file name order.
pub struct DirSource {
    files: std::vec::IntoIter<PathBuf>,
    fps: f64,
}

impl DirSource {
    pub fn open(dir: &Path) -> Result<Self, SourceError> {
        let io = |source| SourceError::Io { path: dir.to_path_buf(), source };
        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(io)? {
            let path = entry.map_err(io)?.path();
            let is_image = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
            if is_image && path.is_file() {
                files.push(path);
            }
        }
        files.sort();
        info!("source: {} images in {}", files.len(), dir.display());
        Ok(Self { files: files.into_iter(), fps: 0.0 })
    }

    pub fn with_fps(mut self, fps: f64) -> Self {
        self.fps = fps;
        self
    }
}

impl FrameSource for DirSource {
    fn nominal_fps(&self) -> f64 {
        self.fps
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>, SourceError> {
        let Some(path) = self.files.next() else { return Ok(None) };
        let img = image::open(&path).map_err(|source| SourceError::Image { path: path.clone(), source })?;
        Ok(Some(img.to_rgb8()))
    }
}

/// Raw `rgb24` frames piped out of an `ffmpeg` child process.
pub struct FfmpegSource {
    child: Child,
    stdout: ChildStdout,
    width: u32,
    height: u32,
    fps: f64,
}

/// Capture size requested from webcams; the device may pick the nearest mode.
pub const WEBCAM_CAPTURE_SIZE: &str = "2560x1440";

fn webcam_input(id: u32) -> ([&'static str; 4], String) {
    (["-f", "video4linux2", "-video_size", WEBCAM_CAPTURE_SIZE], format!("/dev/video{}", id))
}

impl FfmpegSource {
    pub fn file(path: &Path) -> Result<Self, SourceError> {
        Self::spawn(&[], &path.to_string_lossy())
    }

    /// Opens `/dev/video<id>`, requesting [`WEBCAM_CAPTURE_SIZE`].
    pub fn webcam(id: u32) -> Result<Self, SourceError> {
        let (format, device) = webcam_input(id);
        Self::spawn(&format, &device)
    }

    fn spawn(input_format: &[&str], input: &str) -> Result<Self, SourceError> {
        let (width, height, fps) = probe(input_format, input)?;

        let mut cmd = Command::new("ffmpeg");
        cmd.args(["-hide_banner", "-loglevel", "error"])
            .args(input_format)
            .args(["-i", input])
            .args(["-f", "rawvideo", "-pix_fmt", "rgb24", "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped());

        debug!("source: ffmpeg {}", input);
        let mut child = cmd.spawn().map_err(|source| SourceError::Spawn { program: "ffmpeg", source })?;
        let Some(stdout) = child.stdout.take() else {
            let _ = child.kill();
            return Err(SourceError::Pipe(std::io::Error::other("ffmpeg stdout not captured")));
        };
        info!("source: {} {}x{} @ {:.2} fps", input, width, height, fps);
        Ok(Self { child, stdout, width, height, fps })
    }
}

impl FrameSource for FfmpegSource {
    fn nominal_fps(&self) -> f64 {
        self.fps
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>, SourceError> {
        let mut buf = vec![0u8; self.width as usize * self.height as usize * 3];
        match self.stdout.read_exact(&mut buf) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(SourceError::Pipe(e)),
        }
        Ok(RgbImage::from_raw(self.width, self.height, buf))
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        if let Err(e) = self.child.kill() {
            debug!("source: ffmpeg already exited: {}", e);
        }
        let _ = self.child.wait();
    }
}

fn probe(input_format: &[&str], input: &str) -> Result<(u32, u32, f64), SourceError> {
    let out = Command::new("ffprobe")
        .args(["-v", "error", "-select_streams", "v:0"])
        .args(["-show_entries", "stream=width,height,r_frame_rate", "-of", "csv=p=0"])
        .args(input_format)
        .arg(input)
        .output()
        .map_err(|source| SourceError::Spawn { program: "ffprobe", source })?;
    if !out.status.success() {
        return Err(SourceError::Probe(String::from_utf8_lossy(&out.stderr).trim().to_string()));
    }
    parse_probe(&String::from_utf8_lossy(&out.stdout))
}

/// Parses `width,height,num/den` as printed by ffprobe's csv writer.
fn parse_probe(text: &str) -> Result<(u32, u32, f64), SourceError> {
    let line = text.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or_default();
    let bad = || SourceError::Probe(format!("unexpected stream info {:?}", line));

    let mut fields = line.split(',').map(str::trim);
    let width: u32 = fields.next().and_then(|s| s.parse().ok()).ok_or_else(bad)?;
    let height: u32 = fields.next().and_then(|s| s.parse().ok()).ok_or_else(bad)?;
    if width == 0 || height == 0 {
        return Err(bad());
    }
    let fps = match fields.next().map(|r| r.split_once('/').unwrap_or((r, "1"))) {
        Some((n, d)) => match (n.parse::<f64>(), d.parse::<f64>()) {
            (Ok(n), Ok(d)) if d > 0.0 => n / d,
            _ => 0.0,
        },
        None => 0.0,
    };
    Ok((width, height, fps))
}

/// Opens the source a config points at. A `video_path` naming a directory
/// reads still images from it.
pub fn open_source(desc: &SourceDescriptor) -> Result<Box<dyn FrameSource>, PipelineError> {
    let opened: Result<Box<dyn FrameSource>, SourceError> = match desc {
        SourceDescriptor::Webcam(id) => FfmpegSource::webcam(*id).map(|s| Box::new(s) as Box<dyn FrameSource>),
        SourceDescriptor::Path(p) if p.is_dir() => DirSource::open(p).map(|s| Box::new(s) as Box<dyn FrameSource>),
        SourceDescriptor::Path(p) => FfmpegSource::file(p).map(|s| Box::new(s) as Box<dyn FrameSource>),
    };
    opened.map_err(|source| {
        let what = match desc {
            SourceDescriptor::Webcam(id) => format!("webcam {}", id),
            SourceDescriptor::Path(p) => p.display().to_string(),
        };
        warn!("source: cannot open {}", what);
        PipelineError::SourceOpen { what, source }
    })
}
