//! Graph executors: the backends a [`Model`](super::step::Model) drives.
//!
//! An executor exposes a compiled graph as an ordered list of steps. It can run
//! all of them at once, or hand out a cursor that is advanced a few steps at a
//! time and finally yields the named outputs.

pub mod onnx;

use std::time::Instant;

use tracing::trace;

use super::tensor::TensorMap;
use crate::error::{Result, SegmentError};

pub use onnx::{OnnxExecutor, Provider, SessionConfig};

pub trait GraphExecutor {
    /// Resumable execution state for one stepwise run.
    type Cursor;

    fn name(&self) -> &str;

    /// Number of internal steps a full execution takes.
    fn step_count(&self) -> usize;

    fn execute_all(&self, inputs: TensorMap) -> Result<TensorMap>;

    fn begin_stepwise(&self, inputs: TensorMap) -> Result<Self::Cursor>;

    /// Runs up to `steps` further steps. Returns `true` once the last one has run.
    fn advance_cursor(&self, cursor: &mut Self::Cursor, steps: usize) -> Result<bool>;

    /// Consumes a finished cursor and returns the graph outputs.
    fn read_outputs(&self, cursor: Self::Cursor) -> Result<TensorMap>;
}

type LayerFn = Box<dyn Fn(&mut TensorMap) -> Result<()> + Send + Sync>;

struct Layer {
    name: String,
    op: LayerFn,
}

/// A graph of Rust layers run in order over a shared tensor map.
///
/// Each layer reads the tensors it needs from the map and writes its results
/// back; after the last layer the declared outputs are moved out. Everything
/// else, inputs included, is dropped with the map.
pub struct SequentialGraph {
    name: String,
    layers: Vec<Layer>,
    outputs: Vec<String>,
}

pub struct SequentialCursor {
    env: TensorMap,
    next: usize,
}

impl SequentialGraph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            layers: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn layer<F>(mut self, name: impl Into<String>, op: F) -> Self
    where
        F: Fn(&mut TensorMap) -> Result<()> + Send + Sync + 'static,
    {
        self.layers.push(Layer {
            name: name.into(),
            op: Box::new(op),
        });
        self
    }

    pub fn output(mut self, name: impl Into<String>) -> Self {
        self.outputs.push(name.into());
        self
    }

    fn run_layer(&self, index: usize, env: &mut TensorMap) -> Result<()> {
        let layer = &self.layers[index];
        let timer = Instant::now();
        (layer.op)(env)?;
        trace!(graph = %self.name, layer = %layer.name, elapsed = ?timer.elapsed(), "layer done");
        Ok(())
    }

    fn collect_outputs(&self, mut env: TensorMap) -> Result<TensorMap> {
        self.outputs
            .iter()
            .map(|name| {
                env.remove(name)
                    .map(|tensor| (name.clone(), tensor))
                    .ok_or_else(|| SegmentError::missing(name.as_str()))
            })
            .collect()
    }
}

impl GraphExecutor for SequentialGraph {
    type Cursor = SequentialCursor;

    fn name(&self) -> &str {
        &self.name
    }

    fn step_count(&self) -> usize {
        self.layers.len()
    }

    fn execute_all(&self, mut inputs: TensorMap) -> Result<TensorMap> {
        for index in 0..self.layers.len() {
            self.run_layer(index, &mut inputs)?;
        }
        self.collect_outputs(inputs)
    }

    fn begin_stepwise(&self, inputs: TensorMap) -> Result<SequentialCursor> {
        Ok(SequentialCursor {
            env: inputs,
            next: 0,
        })
    }

    fn advance_cursor(&self, cursor: &mut SequentialCursor, steps: usize) -> Result<bool> {
        let end = cursor.next.saturating_add(steps).min(self.layers.len());
        while cursor.next < end {
            self.run_layer(cursor.next, &mut cursor.env)?;
            cursor.next += 1;
        }
        Ok(cursor.next == self.layers.len())
    }

    fn read_outputs(&self, cursor: SequentialCursor) -> Result<TensorMap> {
        if cursor.next < self.layers.len() {
            return Err(SegmentError::OutputNotReady {
                model: self.name.clone(),
                name: self.outputs.join(", "),
            });
        }
        self.collect_outputs(cursor.env)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::tensor::Tensor;

    fn counter_graph(layers: usize) -> SequentialGraph {
        let mut graph = SequentialGraph::new("counter");
        for i in 0..layers {
            graph = graph.layer(format!("add{i}"), |env: &mut TensorMap| {
                let x = env.get_mut("x").ok_or_else(|| SegmentError::missing("x"))?;
                x.view_mut().mapv_inplace(|v| v + 1.0);
                Ok(())
            });
        }
        graph.output("x")
    }

    fn inputs() -> TensorMap {
        TensorMap::from([("x".to_string(), Tensor::zeros(&[2]))])
    }

    #[test]
    fn test_execute_all_runs_every_layer() {
        let graph = counter_graph(4);
        let outputs = graph.execute_all(inputs()).unwrap();
        assert_eq!(&*outputs["x"].values(), &[4.0, 4.0]);
    }

    #[test]
    fn test_stepwise_resumes_where_it_stopped() {
        let graph = counter_graph(5);
        let mut cursor = graph.begin_stepwise(inputs()).unwrap();

        assert!(!graph.advance_cursor(&mut cursor, 2).unwrap());
        assert_eq!(&*cursor.env["x"].values(), &[2.0, 2.0]);
        assert!(!graph.advance_cursor(&mut cursor, 2).unwrap());
        assert!(graph.advance_cursor(&mut cursor, 2).unwrap());

        let outputs = graph.read_outputs(cursor).unwrap();
        assert_eq!(&*outputs["x"].values(), &[5.0, 5.0]);
    }

    #[test]
    fn test_huge_step_count_runs_the_rest() {
        let graph = counter_graph(3);
        let mut cursor = graph.begin_stepwise(inputs()).unwrap();
        assert!(!graph.advance_cursor(&mut cursor, 1).unwrap());
        assert!(graph.advance_cursor(&mut cursor, usize::MAX).unwrap());

        let outputs = graph.read_outputs(cursor).unwrap();
        assert_eq!(&*outputs["x"].values(), &[3.0, 3.0]);
    }

    #[test]
    fn test_unfinished_cursor_has_no_outputs() {
        let graph = counter_graph(3);
        let mut cursor = graph.begin_stepwise(inputs()).unwrap();
        graph.advance_cursor(&mut cursor, 1).unwrap();
        let err = graph.read_outputs(cursor).unwrap_err();
        assert!(matches!(err, SegmentError::OutputNotReady { .. }));
    }

    #[test]
    fn test_missing_output_is_reported() {
        let graph = SequentialGraph::new("empty").output("masks");
        let err = graph.execute_all(TensorMap::new()).unwrap_err();
        match err {
            SegmentError::MissingTensor { name } => assert_eq!(name, "masks"),
            other => panic!("Expected MissingTensor, got {other:?}"),
        }
    }
}
