//! Frame loop that ties the detection stack to a source and a sink, plus the
//! handles a control task uses to steer it while it runs.

pub mod error;
pub mod live;
pub mod pipeline;
pub mod sink;
pub mod source;
pub mod status;

pub use error::{PipelineError, SinkError, SourceError};
pub use live::LiveConfig;
pub use pipeline::{Pipeline, PipelineHandle};
pub use sink::{DirSink, FrameSink, NullSink, SinkControl};
pub use source::{open_source, DirSource, FfmpegSource, FrameSource, WEBCAM_CAPTURE_SIZE};
pub use status::{PipelineReport, PipelineStatus, StopReason, StopSignal};
