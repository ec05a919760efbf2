//! Prompted image segmentation with a frame-budgeted encoder/decoder pipeline.
//!
//! [`SamPipeline`] turns an image and an [`Annotation`] into a [`Mask`]. The
//! blocking API runs both models at once; the incremental API
//! ([`SamPipeline::begin`] / [`SamPipeline::poll`]) executes a bounded number
//! of graph steps per call so a render loop can keep drawing in between.

pub mod config;
pub mod error;
pub mod model;
pub mod utils;

pub use config::Config;
pub use error::{Result, SegmentError};
pub use model::sam::geometry::{GeometryMapper, ResizeRatio};
pub use model::sam::prompt::{Annotation, PointLabel, PromptEncoder, PromptTensors};
pub use model::sam::raster::{Mask, MaskOrigin, MaskRasterizer};
pub use model::sam::{
    Embedding, PipelineConfig, Progress, SamPipeline, Segmentation, Stage, Step,
};
