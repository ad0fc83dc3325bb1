use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative stop flag, checked by the pipeline before each frame.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Requested,
    EndOfStream,
    /// The sink asked to quit.
    SinkClosed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineStatus {
    Starting,
    Running { frame: u64 },
    Stopped(StopReason),
    Failed(String),
}

impl PipelineStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, PipelineStatus::Stopped(_) | PipelineStatus::Failed(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineReport {
    pub frames: u64,
    pub detection_frames: u64,
    pub reason: StopReason,
}
