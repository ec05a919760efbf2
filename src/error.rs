use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = SegmentError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum SegmentError {
    #[error("prompt has {points} points but {labels} labels")]
    PromptShapeMismatch { points: usize, labels: usize },

    #[error("model `{model}` already has an open schedule")]
    AlreadyScheduling { model: String },

    #[error("output `{name}` of model `{model}` is not ready")]
    OutputNotReady { model: String, name: String },

    #[error("`{owner}` has no open schedule to advance")]
    NoSchedule { owner: String },

    #[error("a segmentation is already in flight")]
    Busy,

    #[error("failed to compile graph from {}: {source}", path.display())]
    GraphCompileFailure {
        path: PathBuf,
        #[source]
        source: ort::Error,
    },

    #[error("tensor `{name}` is missing")]
    MissingTensor { name: String },

    #[error("score tensor holds {actual} values, expected at least {expected}")]
    ScoreSize { expected: usize, actual: usize },

    #[error("image has no pixels ({width}x{height})")]
    EmptyImage { width: u32, height: u32 },

    #[error("ONNX Runtime error: {0}")]
    Ort(#[from] ort::Error),

    #[error("tensor shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SegmentError {
    pub(crate) fn missing(name: impl Into<String>) -> Self {
        SegmentError::MissingTensor { name: name.into() }
    }
}
