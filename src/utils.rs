use image::{imageops::FilterType, Rgb, RgbImage};

use crate::model::sam::raster::Mask;

/// Blends `color` over the selected pixels of `image`.
///
/// A mask of another size is stretched to the image first.
pub fn overlay(image: &RgbImage, mask: &Mask, color: [u8; 3], alpha: f32) -> RgbImage {
    let mut mask_img = mask.to_image();
    if mask_img.dimensions() != image.dimensions() {
        mask_img = image::imageops::resize(
            &mask_img,
            image.width(),
            image.height(),
            FilterType::Nearest,
        );
    }

    let alpha = alpha.clamp(0.0, 1.0);
    imageproc::map::map_colors2(image, &mask_img, |p, q| {
        if q[0] == 0 {
            return p;
        }
        let mut out = [0u8; 3];
        for c in 0..3 {
            out[c] = (p[c] as f32 * (1.0 - alpha) + color[c] as f32 * alpha).round() as u8;
        }
        Rgb(out)
    })
}
