use lazy_static::lazy_static;
use ndarray::{ArrayD, IxDyn};

use super::geometry::ResizeRatio;
use crate::error::{Result, SegmentError};
use crate::model::tensor::{Tensor, TensorMap};

pub const POINT_COORDS: &str = "point_coords";
pub const POINT_LABELS: &str = "point_labels";
pub const MASK_INPUT: &str = "mask_input";
pub const HAS_MASK_INPUT: &str = "has_mask_input";
pub const ORIG_IM_SIZE: &str = "orig_im_size";

// the decoder always gets these, prompts never carry a previous mask
lazy_static! {
    static ref EMPTY_MASK: ArrayD<f32> = ArrayD::zeros(IxDyn(&[1, 1, 256, 256]));
    static ref NO_MASK: ArrayD<f32> = ArrayD::zeros(IxDyn(&[1]));
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum PointLabel {
    Background,
    Foreground,
    BoxTopLeft,
    BoxBottomRight,
}

impl PointLabel {
    pub fn value(self) -> f32 {
        match self {
            PointLabel::Background => 0.0,
            PointLabel::Foreground => 1.0,
            PointLabel::BoxTopLeft => 2.0,
            PointLabel::BoxBottomRight => 3.0,
        }
    }
}

/// A user prompt in image pixel coordinates.
#[derive(Debug, Clone, PartialEq)]
pub enum Annotation {
    Point { x: f32, y: f32, inside: bool },
    BoundingBox { top_left: [f32; 2], bottom_right: [f32; 2] },
    PointSet { points: Vec<[f32; 2]>, labels: Vec<PointLabel> },
}

impl Annotation {
    pub fn point(x: f32, y: f32) -> Self {
        Annotation::Point { x, y, inside: true }
    }

    pub fn background_point(x: f32, y: f32) -> Self {
        Annotation::Point {
            x,
            y,
            inside: false,
        }
    }

    /// A box from any two opposite corners.
    pub fn bounding_box(a: [f32; 2], b: [f32; 2]) -> Self {
        Annotation::BoundingBox {
            top_left: [a[0].min(b[0]), a[1].min(b[1])],
            bottom_right: [a[0].max(b[0]), a[1].max(b[1])],
        }
    }

    pub fn point_set(points: Vec<[f32; 2]>, labels: Vec<PointLabel>) -> Self {
        Annotation::PointSet { points, labels }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Annotation::PointSet { points, labels } if points.len() != labels.len() => {
                Err(SegmentError::PromptShapeMismatch {
                    points: points.len(),
                    labels: labels.len(),
                })
            }
            _ => Ok(()),
        }
    }

    /// Every coordinate multiplied by `ratio`.
    pub fn scaled(&self, ratio: ResizeRatio) -> Self {
        match self {
            Annotation::Point { x, y, inside } => {
                let [x, y] = ratio.apply([*x, *y]);
                Annotation::Point {
                    x,
                    y,
                    inside: *inside,
                }
            }
            Annotation::BoundingBox {
                top_left,
                bottom_right,
            } => Annotation::BoundingBox {
                top_left: ratio.apply(*top_left),
                bottom_right: ratio.apply(*bottom_right),
            },
            Annotation::PointSet { points, labels } => Annotation::PointSet {
                points: points.iter().map(|p| ratio.apply(*p)).collect(),
                labels: labels.clone(),
            },
        }
    }

    /// Flattened points and their labels, in decoder order.
    pub fn points_and_labels(&self) -> Result<(Vec<[f32; 2]>, Vec<PointLabel>)> {
        self.validate()?;
        Ok(match self {
            Annotation::Point { x, y, inside } => {
                let label = if *inside {
                    PointLabel::Foreground
                } else {
                    PointLabel::Background
                };
                (vec![[*x, *y]], vec![label])
            }
            Annotation::BoundingBox {
                top_left,
                bottom_right,
            } => (
                vec![
                    [top_left[0].min(bottom_right[0]), top_left[1].min(bottom_right[1])],
                    [top_left[0].max(bottom_right[0]), top_left[1].max(bottom_right[1])],
                ],
                vec![PointLabel::BoxTopLeft, PointLabel::BoxBottomRight],
            ),
            Annotation::PointSet { points, labels } => (points.clone(), labels.clone()),
        })
    }
}

/// Decoder inputs derived from one annotation.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptTensors {
    pub point_coords: Tensor,
    pub point_labels: Tensor,
    pub mask_input: Tensor,
    pub has_mask_input: Tensor,
    pub orig_im_size: Tensor,
}

impl PromptTensors {
    /// The full decoder input map, with `embedding` under `embedding_name`.
    pub fn into_inputs(self, embedding_name: &str, embedding: Tensor) -> TensorMap {
        TensorMap::from([
            (embedding_name.to_string(), embedding),
            (POINT_COORDS.to_string(), self.point_coords),
            (POINT_LABELS.to_string(), self.point_labels),
            (MASK_INPUT.to_string(), self.mask_input),
            (HAS_MASK_INPUT.to_string(), self.has_mask_input),
            (ORIG_IM_SIZE.to_string(), self.orig_im_size),
        ])
    }
}

pub struct PromptEncoder;

impl PromptEncoder {
    /// Encodes an annotation already in model space. `original_size` is the
    /// `(width, height)` of the image before resizing.
    pub fn encode(annotation: &Annotation, original_size: (u32, u32)) -> Result<PromptTensors> {
        let (points, labels) = annotation.points_and_labels()?;
        let n = points.len();

        let coords = points.iter().flat_map(|p| [p[0], p[1]]).collect();
        let labels = labels.iter().map(|l| l.value()).collect();
        let (width, height) = original_size;

        Ok(PromptTensors {
            point_coords: Tensor::from_shape_vec(&[1, n, 2], coords)?,
            point_labels: Tensor::from_shape_vec(&[1, n], labels)?,
            mask_input: Tensor::new(EMPTY_MASK.clone()),
            has_mask_input: Tensor::new(NO_MASK.clone()),
            orig_im_size: Tensor::from_shape_vec(&[2], vec![height as f32, width as f32])?,
        })
    }
}
