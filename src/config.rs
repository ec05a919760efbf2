use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::error::Result;
use crate::model::executor::SessionConfig;
use crate::model::sam::PipelineConfig;

pub const DEFAULT_CONFIG_PATH: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Config {
    pub encoder_path: PathBuf,
    pub decoder_path: PathBuf,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        debug!("Loading config from {}", path.display());

        let json_content = std::fs::read_to_string(path)?;
        Self::from_json(&json_content)
    }

    pub fn from_json(json: &str) -> Result<Config> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SegmentError;
    use crate::model::executor::Provider;
    use crate::model::sam::raster::MaskOrigin;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_minimal_config_gets_defaults() {
        let config = Config::from_json(
            r#"{"encoder_path": "weights/mobile_sam_encoder.onnx",
                "decoder_path": "weights/mobile_sam_decoder.onnx"}"#,
        )
        .unwrap();

        assert_eq!(config.encoder_path, PathBuf::from("weights/mobile_sam_encoder.onnx"));
        assert_eq!(config.session, SessionConfig::default());
        assert_eq!(config.pipeline, PipelineConfig::default());
    }

    #[test]
    fn test_full_config() {
        let config = Config::from_json(
            r#"{
                "encoder_path": "e.onnx",
                "decoder_path": "d.onnx",
                "session": {"provider": "cuda", "intra_threads": 2},
                "pipeline": {
                    "image_size": 512,
                    "step_divisor": 10,
                    "mask_origin": "top_left",
                    "normalize": {"mean": [123.675, 116.28, 103.53], "std": [58.395, 57.12, 57.375]}
                }
            }"#,
        )
        .unwrap();

        assert_eq!(config.session.provider, Provider::Cuda);
        assert_eq!(config.session.intra_threads, 2);
        assert_eq!(config.pipeline.image_size, 512);
        assert_eq!(config.pipeline.step_divisor, 10);
        assert_eq!(config.pipeline.mask_origin, MaskOrigin::TopLeft);
        assert_eq!(config.pipeline.mask_output, "masks");
        assert!(config.pipeline.normalize.is_some());
    }

    #[test]
    fn test_model_paths_are_required() {
        let err = Config::from_json(r#"{"encoder_path": "e.onnx"}"#).unwrap_err();
        assert!(matches!(err, SegmentError::Json(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().expect("temp file");
        file.write_all(br#"{"encoder_path": "e.onnx", "decoder_path": "d.onnx"}"#)
            .expect("write");

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.decoder_path, PathBuf::from("d.onnx"));
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load("/nonexistent/config.json").unwrap_err();
        assert!(matches!(err, SegmentError::Io(_)));
    }

    #[test]
    fn test_example_config_matches_image_rows() {
        let config = Config::from_json(include_str!("../config.example.json")).unwrap();
        assert_eq!(config.pipeline.mask_origin, MaskOrigin::TopLeft);
        assert_eq!(config.session, SessionConfig::default());
        assert_eq!(config.pipeline.image_size, 1024);
    }
}
