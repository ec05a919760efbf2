use std::path::Path;

use ort::{CUDAExecutionProvider, GraphOptimizationLevel, Session};
use serde::Deserialize;
use tracing::{debug, info};

use super::GraphExecutor;
use crate::error::{Result, SegmentError};
use crate::model::tensor::{Tensor, TensorMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    #[default]
    Cpu,
    Cuda,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub provider: Provider,
    pub intra_threads: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            provider: Provider::Cpu,
            intra_threads: 4,
        }
    }
}

/// Runs an ONNX graph through ONNX Runtime.
///
/// The runtime executes a session atomically, so the whole graph counts as a
/// single step: a stepwise run completes on its first advance.
#[derive(Debug)]
pub struct OnnxExecutor {
    name: String,
    session: Session,
}

pub struct OnnxCursor {
    inputs: Option<TensorMap>,
    outputs: Option<TensorMap>,
}

impl OnnxExecutor {
    pub fn from_file(
        name: impl Into<String>,
        path: impl AsRef<Path>,
        config: &SessionConfig,
    ) -> Result<Self> {
        let path = path.as_ref();
        let session =
            Self::build(path, config).map_err(|source| SegmentError::GraphCompileFailure {
                path: path.to_path_buf(),
                source,
            })?;

        let name = name.into();
        info!(
            model = %name,
            path = %path.display(),
            inputs = ?session.inputs.iter().map(|i| i.name.as_str()).collect::<Vec<_>>(),
            outputs = ?session.outputs.iter().map(|o| o.name.as_str()).collect::<Vec<_>>(),
            "graph compiled"
        );

        Ok(Self { name, session })
    }

    fn build(path: &Path, config: &SessionConfig) -> ort::Result<Session> {
        let builder = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(config.intra_threads)?;

        let builder = match config.provider {
            Provider::Cpu => builder,
            Provider::Cuda => builder
                .with_execution_providers([CUDAExecutionProvider::default().build()])?,
        };

        builder.commit_from_file(path)
    }

    fn run(&self, inputs: TensorMap) -> Result<TensorMap> {
        let mut values = Vec::with_capacity(inputs.len());
        for (name, tensor) in inputs {
            let value = ort::Tensor::from_array(tensor.into_array())?;
            values.push((name, value.into_dyn()));
        }

        let session_outputs = self.session.run(values)?;

        let mut outputs = TensorMap::with_capacity(session_outputs.len());
        for (name, value) in session_outputs.iter() {
            let array = value.try_extract_tensor::<f32>()?;
            debug!(model = %self.name, output = %name, shape = ?array.shape(), "output read");
            outputs.insert(name.to_string(), Tensor::new(array.to_owned()));
        }

        Ok(outputs)
    }
}

impl GraphExecutor for OnnxExecutor {
    type Cursor = OnnxCursor;

    fn name(&self) -> &str {
        &self.name
    }

    fn step_count(&self) -> usize {
        1
    }

    fn execute_all(&self, inputs: TensorMap) -> Result<TensorMap> {
        self.run(inputs)
    }

    fn begin_stepwise(&self, inputs: TensorMap) -> Result<OnnxCursor> {
        Ok(OnnxCursor {
            inputs: Some(inputs),
            outputs: None,
        })
    }

    fn advance_cursor(&self, cursor: &mut OnnxCursor, steps: usize) -> Result<bool> {
        if steps > 0 {
            if let Some(inputs) = cursor.inputs.take() {
                cursor.outputs = Some(self.run(inputs)?);
            }
        }
        Ok(cursor.outputs.is_some())
    }

    fn read_outputs(&self, cursor: OnnxCursor) -> Result<TensorMap> {
        cursor.outputs.ok_or_else(|| SegmentError::OutputNotReady {
            model: self.name.clone(),
            name: "*".to_string(),
        })
    }
}
