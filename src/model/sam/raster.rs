use image::GrayImage;
use rayon::prelude::*;
use serde::Deserialize;

use crate::error::{Result, SegmentError};
use crate::model::tensor::Tensor;

/// Binary segmentation result, one byte in {0, 1} per image pixel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl Mask {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Value at `(x, y)`.
    ///
    /// # Panics
    ///
    /// When the coordinate lies outside the mask; see [`Mask::get_checked`].
    pub fn get(&self, x: u32, y: u32) -> u8 {
        match self.get_checked(x, y) {
            Some(v) => v,
            None => panic!(
                "pixel ({x}, {y}) outside {}x{} mask",
                self.width, self.height
            ),
        }
    }

    pub fn get_checked(&self, x: u32, y: u32) -> Option<u8> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let index = y as usize * self.width as usize + x as usize;
        self.data.get(index).copied()
    }

    pub fn as_raw(&self) -> &[u8] {
        &self.data
    }

    /// Number of selected pixels.
    pub fn area(&self) -> usize {
        self.data.iter().filter(|v| **v != 0).count()
    }

    /// Grayscale copy with selected pixels at 255, for saving or display.
    pub fn to_image(&self) -> GrayImage {
        let data = self.data.iter().map(|v| v * 255).collect();
        GrayImage::from_raw(self.width, self.height, data).unwrap_or_default()
    }
}

/// Which edge row 0 of the decoder's score tensor lies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaskOrigin {
    #[default]
    BottomLeft,
    TopLeft,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MaskRasterizer {
    origin: MaskOrigin,
}

impl MaskRasterizer {
    pub fn new(origin: MaskOrigin) -> Self {
        Self { origin }
    }

    /// Thresholds `scores` at zero into a `width` x `height` mask.
    ///
    /// Only the first `width * height` values are read, which is the first
    /// mask when the decoder emits several.
    pub fn rasterize(&self, scores: &Tensor, width: u32, height: u32) -> Result<Mask> {
        let (w, h) = (width as usize, height as usize);
        let values = scores.values();
        if values.len() < w * h {
            return Err(SegmentError::ScoreSize {
                expected: w * h,
                actual: values.len(),
            });
        }

        let mut data = vec![0u8; w * h];
        if w > 0 {
            let values: &[f32] = &values;
            data.par_chunks_mut(w).enumerate().for_each(|(y, row)| {
                let src_y = self.source_row(y, h);
                let src = &values[src_y * w..(src_y + 1) * w];
                for (dst, score) in row.iter_mut().zip(src) {
                    *dst = u8::from(*score > 0.0);
                }
            });
        }

        Ok(Mask {
            width,
            height,
            data,
        })
    }

    fn source_row(&self, y: usize, height: usize) -> usize {
        match self.origin {
            MaskOrigin::BottomLeft => height - 1 - y,
            MaskOrigin::TopLeft => y,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // rows top to bottom in tensor order: [-1, 2], [0, -3], [5, 0.5]
    fn scores() -> Tensor {
        Tensor::from_shape_vec(&[1, 1, 3, 2], vec![-1.0, 2.0, 0.0, -3.0, 5.0, 0.5]).unwrap()
    }

    #[test]
    fn test_rows_are_flipped() {
        let mask = MaskRasterizer::default().rasterize(&scores(), 2, 3).unwrap();
        assert_eq!(mask.as_raw(), &[1, 1, 0, 0, 0, 1]);
        assert_eq!(mask.get(0, 0), 1);
        assert_eq!(mask.get(0, 2), 0);
        assert_eq!(mask.area(), 3);
    }

    #[test]
    fn test_out_of_bounds_lookup() {
        let mask = MaskRasterizer::default().rasterize(&scores(), 2, 3).unwrap();
        assert_eq!(mask.get_checked(1, 2), Some(1));
        assert_eq!(mask.get_checked(2, 0), None);
        assert_eq!(mask.get_checked(0, 3), None);
        assert_eq!(mask.get_checked(u32::MAX, u32::MAX), None);
    }

    #[test]
    #[should_panic(expected = "outside 2x3 mask")]
    fn test_get_panics_outside_mask() {
        let mask = MaskRasterizer::default().rasterize(&scores(), 2, 3).unwrap();
        mask.get(5, 0);
    }

    #[test]
    fn test_top_left_origin_keeps_rows() {
        let mask = MaskRasterizer::new(MaskOrigin::TopLeft)
            .rasterize(&scores(), 2, 3)
            .unwrap();
        assert_eq!(mask.as_raw(), &[0, 1, 0, 0, 1, 1]);
    }

    #[test]
    fn test_zero_is_not_selected() {
        let zeros = Tensor::zeros(&[4, 4]);
        let mask = MaskRasterizer::default().rasterize(&zeros, 4, 4).unwrap();
        assert_eq!(mask.area(), 0);
    }

    #[test]
    fn test_short_tensor_is_rejected() {
        let err = MaskRasterizer::default()
            .rasterize(&scores(), 3, 3)
            .unwrap_err();
        match err {
            SegmentError::ScoreSize { expected, actual } => assert_eq!((expected, actual), (9, 6)),
            other => panic!("Expected ScoreSize, got {other:?}"),
        }
    }

    #[test]
    fn test_mask_image_is_visible() {
        let mask = MaskRasterizer::default().rasterize(&scores(), 2, 3).unwrap();
        let image = mask.to_image();
        assert_eq!(image.dimensions(), (2, 3));
        assert_eq!(image.get_pixel(0, 0).0, [255]);
        assert_eq!(image.get_pixel(0, 1).0, [0]);
    }
}
