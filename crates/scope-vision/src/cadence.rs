use scope_proto::TrackingMode;

/// Rate assumed when the source does not report one.
pub const FALLBACK_FPS: f64 = 30.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameAction {
    /// Run every model on this frame.
    Detect,
    /// Predict mode between detection frames: drop the retained boxes.
    ClearStale,
}

/// Frames between detections. Halves round to even, so 30 fps at 12/s gives 2.
pub fn detect_interval(video_fps: f64, detections_per_second: u32) -> u64 {
    if detections_per_second == 0 {
        return 1;
    }
    let fps = if video_fps.is_finite() && video_fps > 0.0 { video_fps } else { FALLBACK_FPS };
    let n = (fps / detections_per_second as f64).round_ties_even();
    (n as u64).max(1)
}

pub fn frame_action(frame_index: u64, interval: u64, mode: TrackingMode) -> FrameAction {
    // trackers need every frame to keep identities
    if mode.is_tracking() || frame_index % interval.max(1) == 0 {
        FrameAction::Detect
    } else {
        FrameAction::ClearStale
    }
}

/// Per-session frame counter. The target rate is re-read on every tick so a
/// published config changes the cadence from the next frame on.
#[derive(Debug, Clone)]
pub struct CadenceCtl {
    video_fps: f64,
    frame_counter: u64,
}

impl CadenceCtl {
    pub fn new(video_fps: f64) -> Self {
        let video_fps = if video_fps.is_finite() && video_fps > 0.0 { video_fps } else { FALLBACK_FPS };
        Self { video_fps, frame_counter: 0 }
    }

    /// Advances to the next frame (the first is frame 1) and decides it.
    pub fn tick(&mut self, detections_per_second: u32, mode: TrackingMode) -> FrameAction {
        self.frame_counter += 1;
        let interval = detect_interval(self.video_fps, detections_per_second);
        frame_action(self.frame_counter, interval, mode)
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_counter
    }

    pub fn video_fps(&self) -> f64 {
        self.video_fps
    }
}
