use image::{imageops, imageops::FilterType, DynamicImage, GenericImageView, RgbImage};
use ndarray::Array4;

use super::prompt::Annotation;
use crate::error::{Result, SegmentError};
use crate::model::tensor::Tensor;

/// Scale from original image pixels to resized (model space) pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResizeRatio {
    pub width: f32,
    pub height: f32,
}

impl ResizeRatio {
    pub fn identity() -> Self {
        Self {
            width: 1.0,
            height: 1.0,
        }
    }

    pub fn apply(&self, point: [f32; 2]) -> [f32; 2] {
        [point[0] * self.width, point[1] * self.height]
    }

    pub fn invert(&self, point: [f32; 2]) -> [f32; 2] {
        [point[0] / self.width, point[1] / self.height]
    }
}

/// Maps images and prompts into the encoder's square input space.
///
/// The long side is scaled to `target_long_side` and the result is placed in
/// the top-left corner of a square canvas, so model coordinates are image
/// coordinates times the resize ratio with no offset.
#[derive(Debug, Clone)]
pub struct GeometryMapper {
    target_long_side: u32,
    filter: FilterType,
}

impl GeometryMapper {
    pub fn new(target_long_side: u32) -> Self {
        Self {
            target_long_side: target_long_side.max(1),
            filter: FilterType::Triangle,
        }
    }

    pub fn target_long_side(&self) -> u32 {
        self.target_long_side
    }

    pub fn resize_for_model(&self, image: &DynamicImage) -> Result<(DynamicImage, ResizeRatio)> {
        let (w, h) = image.dimensions();
        if w == 0 || h == 0 {
            return Err(SegmentError::EmptyImage {
                width: w,
                height: h,
            });
        }

        let scale = self.target_long_side as f32 / w.max(h) as f32;
        let new_w = ((w as f32 * scale).round() as u32).max(1);
        let new_h = ((h as f32 * scale).round() as u32).max(1);

        let resized = if (new_w, new_h) == (w, h) {
            image.clone()
        } else {
            image.resize_exact(new_w, new_h, self.filter)
        };

        let ratio = ResizeRatio {
            width: new_w as f32 / w as f32,
            height: new_h as f32 / h as f32,
        };

        Ok((resized, ratio))
    }

    /// Places `image` at the top-left of a black square canvas.
    pub fn square_pad(&self, image: &DynamicImage) -> RgbImage {
        let rgb = image.to_rgb8();
        let (w, h) = rgb.dimensions();
        let size = w.max(h);
        if w == h {
            return rgb;
        }

        let mut canvas = RgbImage::new(size, size);
        imageops::replace(&mut canvas, &rgb, 0, 0);
        canvas
    }

    pub fn map_annotation(annotation: &Annotation, ratio: ResizeRatio) -> Annotation {
        annotation.scaled(ratio)
    }

    /// `[1, 3, S, S]` RGB tensor with values in `0..=255`.
    pub fn to_input_tensor(&self, square: &RgbImage) -> Tensor {
        let (w, h) = square.dimensions();
        let mut input = Array4::<f32>::zeros((1, 3, h as usize, w as usize));
        for (x, y, pixel) in square.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            let [r, g, b] = pixel.0;

            input[[0, 0, y, x]] = r as f32;
            input[[0, 1, y, x]] = g as f32;
            input[[0, 2, y, x]] = b as f32;
        }

        Tensor::new(input.into_dyn())
    }

    /// Resize, pad and convert in one go.
    pub fn preprocess(&self, image: &DynamicImage) -> Result<(Tensor, ResizeRatio)> {
        let (resized, ratio) = self.resize_for_model(image)?;
        let square = self.square_pad(&resized);
        drop(resized);

        Ok((self.to_input_tensor(&square), ratio))
    }
}
