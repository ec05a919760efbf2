//! Prompted segmentation: image encoder, prompt encoding, mask decoder.

pub mod geometry;
pub mod prompt;
pub mod raster;

use std::time::Instant;

use image::{DynamicImage, GenericImageView};
use serde::Deserialize;
use tracing::{debug, info};

use super::executor::{GraphExecutor, OnnxExecutor};
use super::step::{normalize, Model, Outcome, DEFAULT_STEP_DIVISOR};
use super::tensor::{Tensor, TensorMap};
use crate::config::Config;
use crate::error::{Result, SegmentError};
use geometry::{GeometryMapper, ResizeRatio};
use prompt::{Annotation, PromptEncoder};
use raster::{Mask, MaskOrigin, MaskRasterizer};

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Normalization {
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Long side of the square encoder input.
    pub image_size: u32,
    pub step_divisor: usize,
    /// Row order of the decoder's score tensor. The default reads it
    /// bottom-up; stock MobileSAM ONNX decoders emit image-order rows and
    /// need `"top_left"`, or masks come out upside down.
    pub mask_origin: MaskOrigin,
    pub encoder_input: String,
    pub embedding_output: String,
    pub mask_output: String,
    /// Applied to the encoder input when the graph does not normalize itself.
    pub normalize: Option<Normalization>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            image_size: 1024,
            step_divisor: DEFAULT_STEP_DIVISOR,
            mask_origin: MaskOrigin::BottomLeft,
            encoder_input: "input_image".to_string(),
            embedding_output: "image_embeddings".to_string(),
            mask_output: "masks".to_string(),
            normalize: None,
        }
    }
}

/// Encoder output together with the geometry it was computed for.
#[derive(Debug, Clone)]
pub struct Embedding {
    tensor: Tensor,
    ratio: ResizeRatio,
    original_size: (u32, u32),
}

impl Embedding {
    pub fn tensor(&self) -> &Tensor {
        &self.tensor
    }

    pub fn ratio(&self) -> ResizeRatio {
        self.ratio
    }

    pub fn original_size(&self) -> (u32, u32) {
        self.original_size
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum Stage {
    Encode,
    Decode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub stage: Stage,
    pub executed: usize,
    pub total: usize,
}

impl Progress {
    /// Overall completion in `0.0..=1.0`, encode and decode weighted equally.
    pub fn fraction(&self) -> f32 {
        let stage = if self.total == 0 {
            1.0
        } else {
            self.executed as f32 / self.total as f32
        };
        match self.stage {
            Stage::Encode => stage * 0.5,
            Stage::Decode => 0.5 + stage * 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Progress(Progress),
    Done(Mask),
}

enum Job {
    Idle,
    Encoding {
        annotation: Annotation,
        original_size: (u32, u32),
        ratio: ResizeRatio,
    },
    Decoding {
        original_size: (u32, u32),
    },
}

pub struct SamPipeline<E: GraphExecutor> {
    encoder: Model<E>,
    decoder: Model<E>,
    geometry: GeometryMapper,
    rasterizer: MaskRasterizer,
    config: PipelineConfig,
    job: Job,
}

impl SamPipeline<OnnxExecutor> {
    pub fn from_config(config: &Config) -> Result<Self> {
        let encoder = OnnxExecutor::from_file("encoder", &config.encoder_path, &config.session)?;
        let decoder = OnnxExecutor::from_file("decoder", &config.decoder_path, &config.session)?;

        let mut encoder = Model::with_divisor(encoder, config.pipeline.step_divisor);
        if let Some(n) = config.pipeline.normalize {
            encoder = encoder.with_preprocess(normalize(
                config.pipeline.encoder_input.as_str(),
                n.mean,
                n.std,
            ));
        }
        let decoder = Model::with_divisor(decoder, config.pipeline.step_divisor);

        Ok(Self::new(encoder, decoder, config.pipeline.clone()))
    }
}

impl<E: GraphExecutor> SamPipeline<E> {
    pub fn new(encoder: Model<E>, decoder: Model<E>, config: PipelineConfig) -> Self {
        Self {
            encoder,
            decoder,
            geometry: GeometryMapper::new(config.image_size),
            rasterizer: MaskRasterizer::new(config.mask_origin),
            config,
            job: Job::Idle,
        }
    }

    pub fn encoder(&self) -> &Model<E> {
        &self.encoder
    }

    pub fn decoder(&self) -> &Model<E> {
        &self.decoder
    }

    pub fn encoder_mut(&mut self) -> &mut Model<E> {
        &mut self.encoder
    }

    pub fn decoder_mut(&mut self) -> &mut Model<E> {
        &mut self.decoder
    }

    pub fn is_busy(&self) -> bool {
        !matches!(self.job, Job::Idle)
    }

    /// Runs the whole pipeline on the calling thread.
    pub fn segment_blocking(
        &mut self,
        image: &DynamicImage,
        annotation: &Annotation,
    ) -> Result<Mask> {
        annotation.validate()?;
        if self.is_busy() {
            return Err(SegmentError::Busy);
        }

        let timer = Instant::now();
        let embedding = self.embed(image)?;
        let mask = self.decode_owned(embedding, annotation)?;
        info!(elapsed = ?timer.elapsed(), area = mask.area(), "segmented");
        Ok(mask)
    }

    /// Encodes `image` once so several prompts can be decoded against it.
    pub fn embed(&mut self, image: &DynamicImage) -> Result<Embedding> {
        let (input, ratio) = self.geometry.preprocess(image)?;
        let inputs = TensorMap::from([(self.config.encoder_input.clone(), input)]);
        let mut outputs = self.encoder.predict_blocking(inputs)?;

        let tensor = take_tensor(&mut outputs, &self.config.embedding_output)?;
        debug!(shape = ?tensor.shape(), ?ratio, "image embedded");

        Ok(Embedding {
            tensor,
            ratio,
            original_size: image.dimensions(),
        })
    }

    pub fn decode(&mut self, embedding: &Embedding, annotation: &Annotation) -> Result<Mask> {
        self.decode_owned(embedding.clone(), annotation)
    }

    fn decode_owned(&mut self, embedding: Embedding, annotation: &Annotation) -> Result<Mask> {
        let inputs = self.decoder_inputs(
            embedding.tensor,
            annotation,
            embedding.ratio,
            embedding.original_size,
        )?;
        let mut outputs = self.decoder.predict_blocking(inputs)?;

        let scores = take_tensor(&mut outputs, &self.config.mask_output)?;
        drop(outputs);

        let (width, height) = embedding.original_size;
        self.rasterizer.rasterize(&scores, width, height)
    }

    /// Starts an incremental segmentation; drive it with [`Self::poll`].
    ///
    /// The image is preprocessed here, so it need not outlive this call.
    pub fn begin(&mut self, image: &DynamicImage, annotation: &Annotation) -> Result<()> {
        annotation.validate()?;
        if self.is_busy() {
            return Err(SegmentError::Busy);
        }

        let (input, ratio) = self.geometry.preprocess(image)?;
        let inputs = TensorMap::from([(self.config.encoder_input.clone(), input)]);
        self.encoder.begin_incremental(inputs)?;

        self.job = Job::Encoding {
            annotation: annotation.clone(),
            original_size: image.dimensions(),
            ratio,
        };
        debug!(size = ?image.dimensions(), "segmentation started");
        Ok(())
    }

    /// Runs one step budget of whichever model is active.
    ///
    /// Step granularity comes from the executor: a [`SequentialGraph`] steps
    /// layer by layer, while an [`OnnxExecutor`] runs its whole graph in one
    /// step, so there a poll only separates encoding from decoding.
    ///
    /// Any error cancels the segmentation before it is returned.
    ///
    /// [`SequentialGraph`]: super::executor::SequentialGraph
    pub fn poll(&mut self) -> Result<Step> {
        let step = self.poll_job();
        if step.is_err() {
            self.cancel();
        }
        step
    }

    /// Abandons the current segmentation and drops every tensor it holds.
    pub fn cancel(&mut self) {
        self.decoder.cancel();
        self.encoder.cancel();
        if self.is_busy() {
            debug!("segmentation cancelled");
            self.job = Job::Idle;
        }
    }

    /// Iterator form of [`Self::begin`] and [`Self::poll`].
    pub fn segment_incremental<'a>(
        &'a mut self,
        image: &DynamicImage,
        annotation: &Annotation,
    ) -> Result<Segmentation<'a, E>> {
        self.begin(image, annotation)?;
        Ok(Segmentation {
            pipeline: self,
            finished: false,
        })
    }

    fn poll_job(&mut self) -> Result<Step> {
        match std::mem::replace(&mut self.job, Job::Idle) {
            Job::Idle => Err(SegmentError::NoSchedule {
                owner: "pipeline".to_string(),
            }),
            Job::Encoding {
                annotation,
                original_size,
                ratio,
            } => match self.encoder.advance()? {
                Outcome::Continuing => {
                    self.job = Job::Encoding {
                        annotation,
                        original_size,
                        ratio,
                    };
                    Ok(Step::Progress(self.progress(Stage::Encode)))
                }
                Outcome::Complete => {
                    let progress = self.progress(Stage::Encode);
                    let mut outputs = self.encoder.take_outputs()?;
                    let embedding = take_tensor(&mut outputs, &self.config.embedding_output)?;
                    drop(outputs);

                    let inputs =
                        self.decoder_inputs(embedding, &annotation, ratio, original_size)?;
                    self.decoder.begin_incremental(inputs)?;
                    self.job = Job::Decoding { original_size };
                    Ok(Step::Progress(progress))
                }
            },
            Job::Decoding { original_size } => match self.decoder.advance()? {
                Outcome::Continuing => {
                    self.job = Job::Decoding { original_size };
                    Ok(Step::Progress(self.progress(Stage::Decode)))
                }
                Outcome::Complete => {
                    let mut outputs = self.decoder.take_outputs()?;
                    let scores = take_tensor(&mut outputs, &self.config.mask_output)?;
                    drop(outputs);

                    let (width, height) = original_size;
                    let mask = self.rasterizer.rasterize(&scores, width, height)?;
                    debug!(area = mask.area(), "segmentation done");
                    Ok(Step::Done(mask))
                }
            },
        }
    }

    fn progress(&self, stage: Stage) -> Progress {
        let (executed, total) = match stage {
            Stage::Encode => self.encoder.progress(),
            Stage::Decode => self.decoder.progress(),
        };
        Progress {
            stage,
            executed,
            total,
        }
    }

    fn decoder_inputs(
        &self,
        embedding: Tensor,
        annotation: &Annotation,
        ratio: ResizeRatio,
        original_size: (u32, u32),
    ) -> Result<TensorMap> {
        let annotation = GeometryMapper::map_annotation(annotation, ratio);
        let prompt = PromptEncoder::encode(&annotation, original_size)?;
        Ok(prompt.into_inputs(&self.config.embedding_output, embedding))
    }
}

fn take_tensor(outputs: &mut TensorMap, name: &str) -> Result<Tensor> {
    outputs.remove(name).ok_or_else(|| SegmentError::missing(name))
}

/// A single-use sequence of progress reports ending in the mask.
///
/// Dropping it before the end cancels the segmentation.
pub struct Segmentation<'a, E: GraphExecutor> {
    pipeline: &'a mut SamPipeline<E>,
    finished: bool,
}

impl<E: GraphExecutor> Segmentation<'_, E> {
    pub fn cancel(mut self) {
        self.pipeline.cancel();
        self.finished = true;
    }
}

impl<E: GraphExecutor> Iterator for Segmentation<'_, E> {
    type Item = Result<Step>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        let step = self.pipeline.poll();
        if matches!(step, Ok(Step::Done(_)) | Err(_)) {
            self.finished = true;
        }
        Some(step)
    }
}

impl<E: GraphExecutor> Drop for Segmentation<'_, E> {
    fn drop(&mut self) {
        if !self.finished {
            self.pipeline.cancel();
        }
    }
}
