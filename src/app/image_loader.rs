use std::path::PathBuf;

use image::DynamicImage;
use tracing::info;

#[derive(Clone)]
pub struct Image {
    pub data: DynamicImage,
    pub path: PathBuf,
    pub file_size: u64,
}

impl Image {
    pub fn load(path: PathBuf) -> stepsam::Result<Self> {
        let data = image::ImageReader::open(&path)?.decode()?;
        let file_size = std::fs::metadata(&path)?.len();
        info!(
            path = %path.display(),
            width = data.width(),
            height = data.height(),
            file_size,
            "image loaded"
        );

        Ok(Image {
            data,
            path,
            file_size,
        })
    }
}
