use scope_vision::detector::{DetectorError, ModelLoadError};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("read {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("decode {}", path.display())]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("spawn {program}")]
    Spawn {
        program: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("ffprobe: {0}")]
    Probe(String),
    #[error("ffmpeg pipe")]
    Pipe(#[source] std::io::Error),
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("create {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("write {}", path.display())]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no models configured")]
    NoModels,
    #[error("load model {}", path.display())]
    ModelLoad {
        path: PathBuf,
        #[source]
        source: DetectorError,
    },
    #[error("open source {what}")]
    SourceOpen {
        what: String,
        #[source]
        source: SourceError,
    },
    #[error("frame source")]
    Source(#[source] SourceError),
    #[error("frame sink")]
    Sink(#[source] SinkError),
    #[error("pipeline task ended abnormally: {0}")]
    Aborted(String),
}

impl From<ModelLoadError> for PipelineError {
    fn from(e: ModelLoadError) -> Self {
        PipelineError::ModelLoad { path: e.path, source: e.source }
    }
}
