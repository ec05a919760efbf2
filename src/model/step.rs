//! Frame-budgeted execution of a single graph.
//!
//! A [`Model`] wraps a [`GraphExecutor`] and can run it either in one go
//! ([`Model::predict_blocking`]) or as a resumable schedule that executes a
//! bounded number of steps per [`Model::advance`] call. Between two calls the
//! caller is free to do other work, typically render a frame.
//!
//! ```text
//! Idle --begin_incremental--> Running --advance (Continuing)--> Running
//!                                     --advance (Complete)----> Complete
//! Complete --begin_incremental--> Running
//! ```

use std::mem;

use tracing::{debug, trace};

use super::executor::GraphExecutor;
use super::tensor::{Tensor, TensorMap};
use crate::error::{Result, SegmentError};

/// Divisor applied to a graph's step count to get the per-advance budget.
pub const DEFAULT_STEP_DIVISOR: usize = 5;

/// Rewrites a tensor map before it enters or after it leaves a graph.
pub type Transform = Box<dyn Fn(&mut TensorMap) -> Result<()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Continuing,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleStatus {
    Idle,
    Running,
    Complete,
}

enum Schedule<C> {
    Idle,
    Running { cursor: C, executed: usize },
    Complete { outputs: TensorMap },
}

/// Steps run per advance: `total / divisor`, never less than one.
pub fn step_budget(total_steps: usize, divisor: usize) -> usize {
    (total_steps / divisor.max(1)).max(1)
}

pub struct Model<E: GraphExecutor> {
    executor: E,
    step_budget: usize,
    preprocess: Option<Transform>,
    postprocess: Option<Transform>,
    schedule: Schedule<E::Cursor>,
}

impl<E: GraphExecutor> Model<E> {
    pub fn new(executor: E) -> Self {
        Self::with_divisor(executor, DEFAULT_STEP_DIVISOR)
    }

    pub fn with_divisor(executor: E, divisor: usize) -> Self {
        let step_budget = step_budget(executor.step_count(), divisor);
        debug!(
            model = %executor.name(),
            steps = executor.step_count(),
            step_budget,
            "model ready"
        );

        Self {
            executor,
            step_budget,
            preprocess: None,
            postprocess: None,
            schedule: Schedule::Idle,
        }
    }

    pub fn with_preprocess(mut self, transform: Transform) -> Self {
        self.preprocess = Some(transform);
        self
    }

    pub fn with_postprocess(mut self, transform: Transform) -> Self {
        self.postprocess = Some(transform);
        self
    }

    pub fn name(&self) -> &str {
        self.executor.name()
    }

    pub fn step_count(&self) -> usize {
        self.executor.step_count()
    }

    pub fn step_budget(&self) -> usize {
        self.step_budget
    }

    pub fn set_step_budget(&mut self, step_budget: usize) {
        self.step_budget = step_budget.max(1);
    }

    pub fn status(&self) -> ScheduleStatus {
        match self.schedule {
            Schedule::Idle => ScheduleStatus::Idle,
            Schedule::Running { .. } => ScheduleStatus::Running,
            Schedule::Complete { .. } => ScheduleStatus::Complete,
        }
    }

    /// Executed and total steps of the current schedule.
    pub fn progress(&self) -> (usize, usize) {
        let total = self.step_count();
        match self.schedule {
            Schedule::Idle => (0, total),
            Schedule::Running { executed, .. } => (executed, total),
            Schedule::Complete { .. } => (total, total),
        }
    }

    /// Runs every step on the calling thread and returns the outputs.
    pub fn predict_blocking(&mut self, inputs: TensorMap) -> Result<TensorMap> {
        self.ensure_not_running()?;
        self.schedule = Schedule::Idle;

        let inputs = self.apply(&self.preprocess, inputs)?;
        let outputs = self.executor.execute_all(inputs)?;
        self.apply(&self.postprocess, outputs)
    }

    /// Installs `inputs` and opens a schedule without running anything.
    pub fn begin_incremental(&mut self, inputs: TensorMap) -> Result<()> {
        self.ensure_not_running()?;
        self.schedule = Schedule::Idle;

        let inputs = self.apply(&self.preprocess, inputs)?;
        let cursor = self.executor.begin_stepwise(inputs)?;
        debug!(model = %self.name(), steps = self.step_count(), budget = self.step_budget, "schedule opened");
        self.schedule = Schedule::Running {
            cursor,
            executed: 0,
        };
        Ok(())
    }

    pub fn advance(&mut self) -> Result<Outcome> {
        self.advance_by(self.step_budget)
    }

    /// Runs up to `budget` steps of the open schedule.
    ///
    /// On error the schedule is dropped along with every tensor it held.
    pub fn advance_by(&mut self, budget: usize) -> Result<Outcome> {
        let budget = budget.max(1);
        let (mut cursor, executed) = match mem::replace(&mut self.schedule, Schedule::Idle) {
            Schedule::Running { cursor, executed } => (cursor, executed),
            other => {
                self.schedule = other;
                return Err(SegmentError::NoSchedule {
                    owner: self.name().to_string(),
                });
            }
        };

        let done = self.executor.advance_cursor(&mut cursor, budget)?;
        let executed = executed.saturating_add(budget).min(self.step_count());
        trace!(model = %self.name(), executed, total = self.step_count(), "advanced");

        if !done {
            self.schedule = Schedule::Running { cursor, executed };
            return Ok(Outcome::Continuing);
        }

        let outputs = self.executor.read_outputs(cursor)?;
        let outputs = self.apply(&self.postprocess, outputs)?;
        debug!(model = %self.name(), "schedule complete");
        self.schedule = Schedule::Complete { outputs };
        Ok(Outcome::Complete)
    }

    /// Borrows a named output of the completed schedule.
    pub fn peek_output(&self, name: &str) -> Result<&Tensor> {
        match &self.schedule {
            Schedule::Complete { outputs } => {
                outputs.get(name).ok_or_else(|| SegmentError::missing(name))
            }
            _ => Err(SegmentError::OutputNotReady {
                model: self.name().to_string(),
                name: name.to_string(),
            }),
        }
    }

    /// Moves the completed outputs out, returning the model to idle.
    pub fn take_outputs(&mut self) -> Result<TensorMap> {
        match mem::replace(&mut self.schedule, Schedule::Idle) {
            Schedule::Complete { outputs } => Ok(outputs),
            other => {
                self.schedule = other;
                Err(SegmentError::OutputNotReady {
                    model: self.name().to_string(),
                    name: "*".to_string(),
                })
            }
        }
    }

    /// Drops any open schedule or unread outputs. Safe to call repeatedly.
    pub fn cancel(&mut self) {
        if !matches!(self.schedule, Schedule::Idle) {
            debug!(model = %self.name(), status = ?self.status(), "schedule cancelled");
            self.schedule = Schedule::Idle;
        }
    }

    fn ensure_not_running(&self) -> Result<()> {
        if matches!(self.schedule, Schedule::Running { .. }) {
            return Err(SegmentError::AlreadyScheduling {
                model: self.name().to_string(),
            });
        }
        Ok(())
    }

    fn apply(&self, transform: &Option<Transform>, mut tensors: TensorMap) -> Result<TensorMap> {
        if let Some(transform) = transform {
            transform(&mut tensors)?;
        }
        Ok(tensors)
    }
}

/// Per-channel `(x - mean) / std` over an NCHW input named `input`.
pub fn normalize(input: impl Into<String>, mean: [f32; 3], std: [f32; 3]) -> Transform {
    let input = input.into();
    Box::new(move |tensors: &mut TensorMap| {
        let tensor = tensors
            .get_mut(&input)
            .ok_or_else(|| SegmentError::missing(input.as_str()))?;
        let mut view = tensor.view_mut();
        for (channel, mut plane) in view.axis_iter_mut(ndarray::Axis(1)).enumerate() {
            let (m, s) = (mean[channel % 3], std[channel % 3]);
            plane.mapv_inplace(|v| (v - m) / s);
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::executor::SequentialGraph;

    fn graph(steps: usize) -> SequentialGraph {
        let mut graph = SequentialGraph::new("decoder");
        for i in 0..steps {
            graph = graph.layer(format!("l{i}"), |env: &mut TensorMap| {
                let x = env.get_mut("x").ok_or_else(|| SegmentError::missing("x"))?;
                x.view_mut().mapv_inplace(|v| v * 2.0);
                Ok(())
            });
        }
        graph.output("x")
    }

    fn inputs() -> TensorMap {
        TensorMap::from([(
            "x".to_string(),
            Tensor::from_shape_vec(&[1], vec![1.0]).unwrap(),
        )])
    }

    fn continuing_count(steps: usize, budget: usize) -> usize {
        let mut model = Model::new(graph(steps));
        model.set_step_budget(budget);
        model.begin_incremental(inputs()).unwrap();

        let mut continuing = 0;
        loop {
            match model.advance().unwrap() {
                Outcome::Continuing => continuing += 1,
                Outcome::Complete => break,
            }
        }
        continuing
    }

    #[test]
    fn test_step_budget_uses_divisor_and_clamps() {
        assert_eq!(step_budget(50, DEFAULT_STEP_DIVISOR), 10);
        assert_eq!(step_budget(3, DEFAULT_STEP_DIVISOR), 1);
        assert_eq!(step_budget(0, DEFAULT_STEP_DIVISOR), 1);
        assert_eq!(step_budget(12, 0), 12);

        let model = Model::new(graph(23));
        assert_eq!(model.step_budget(), 4);
    }

    #[test]
    fn test_continuing_count_is_ceil_minus_one() {
        for (steps, budget) in [(10usize, 3usize), (9, 3), (1, 1), (7, 7), (7, 20), (12, 5)] {
            let expected = steps.div_ceil(budget) - 1;
            assert_eq!(
                continuing_count(steps, budget),
                expected,
                "steps {steps} budget {budget}"
            );
        }
    }

    #[test]
    fn test_advance_after_complete_is_rejected() {
        let mut model = Model::new(graph(2));
        model.begin_incremental(inputs()).unwrap();
        assert_eq!(model.advance_by(5).unwrap(), Outcome::Complete);
        assert_eq!(model.status(), ScheduleStatus::Complete);

        let err = model.advance().unwrap_err();
        assert!(matches!(err, SegmentError::NoSchedule { .. }));
        assert!(model.peek_output("x").is_ok());
    }

    #[test]
    fn test_unbounded_budget_finishes_schedule() {
        let mut model = Model::new(graph(4));
        model.set_step_budget(1);
        model.begin_incremental(inputs()).unwrap();
        assert_eq!(model.advance().unwrap(), Outcome::Continuing);

        assert_eq!(model.advance_by(usize::MAX).unwrap(), Outcome::Complete);
        assert_eq!(model.progress(), (4, 4));
        assert_eq!(&*model.peek_output("x").unwrap().values(), &[16.0]);
    }

    #[test]
    fn test_advance_without_schedule_is_rejected() {
        let mut model = Model::new(graph(2));
        assert!(matches!(
            model.advance(),
            Err(SegmentError::NoSchedule { .. })
        ));
    }

    #[test]
    fn test_second_schedule_while_running_fails() {
        let mut model = Model::new(graph(4));
        model.set_step_budget(1);
        model.begin_incremental(inputs()).unwrap();
        model.advance().unwrap();

        let err = model.begin_incremental(inputs()).unwrap_err();
        assert!(matches!(err, SegmentError::AlreadyScheduling { .. }));
        let err = model.predict_blocking(inputs()).unwrap_err();
        assert!(matches!(err, SegmentError::AlreadyScheduling { .. }));
    }

    #[test]
    fn test_outputs_readable_only_after_complete() {
        let mut model = Model::new(graph(3));
        model.set_step_budget(1);
        assert!(matches!(
            model.peek_output("x"),
            Err(SegmentError::OutputNotReady { .. })
        ));

        model.begin_incremental(inputs()).unwrap();
        model.advance().unwrap();
        assert!(matches!(
            model.peek_output("x"),
            Err(SegmentError::OutputNotReady { .. })
        ));
        assert_eq!(model.progress(), (1, 3));

        model.advance().unwrap();
        assert_eq!(model.advance().unwrap(), Outcome::Complete);
        assert_eq!(&*model.peek_output("x").unwrap().values(), &[8.0]);
        assert!(matches!(
            model.peek_output("y"),
            Err(SegmentError::MissingTensor { .. })
        ));
    }

    #[test]
    fn test_begin_after_complete_starts_fresh() {
        let mut model = Model::new(graph(2));
        model.begin_incremental(inputs()).unwrap();
        model.advance_by(2).unwrap();

        model.begin_incremental(inputs()).unwrap();
        assert_eq!(model.status(), ScheduleStatus::Running);
        assert_eq!(model.progress(), (0, 2));
    }

    #[test]
    fn test_incremental_matches_blocking() {
        let mut model = Model::new(graph(6));
        let blocking = model.predict_blocking(inputs()).unwrap();

        model.set_step_budget(4);
        model.begin_incremental(inputs()).unwrap();
        while model.advance().unwrap() == Outcome::Continuing {}
        let incremental = model.take_outputs().unwrap();

        assert_eq!(blocking, incremental);
        assert_eq!(model.status(), ScheduleStatus::Idle);
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let mut model = Model::new(graph(4));
        model.set_step_budget(1);
        model.begin_incremental(inputs()).unwrap();
        model.advance().unwrap();

        model.cancel();
        model.cancel();
        assert_eq!(model.status(), ScheduleStatus::Idle);
        model.begin_incremental(inputs()).unwrap();
    }

    #[test]
    fn test_failing_step_drops_schedule() {
        let failing = SequentialGraph::new("broken")
            .layer("fail", |_: &mut TensorMap| Err(SegmentError::missing("weights")))
            .output("x");
        let mut model = Model::new(failing);
        model.begin_incremental(inputs()).unwrap();

        assert!(model.advance().is_err());
        assert_eq!(model.status(), ScheduleStatus::Idle);
    }

    #[test]
    fn test_transforms_wrap_execution() {
        let mut model = Model::new(graph(1))
            .with_preprocess(Box::new(|tensors: &mut TensorMap| {
                tensors.insert("x".to_string(), Tensor::from_shape_vec(&[1], vec![3.0])?);
                Ok(())
            }))
            .with_postprocess(Box::new(|tensors: &mut TensorMap| {
                tensors.insert("seen".to_string(), Tensor::zeros(&[1]));
                Ok(())
            }));

        let outputs = model.predict_blocking(inputs()).unwrap();
        assert_eq!(&*outputs["x"].values(), &[6.0]);
        assert!(outputs.contains_key("seen"));

        model.begin_incremental(inputs()).unwrap();
        model.advance().unwrap();
        assert!(model.peek_output("seen").is_ok());
    }

    #[test]
    fn test_normalize_is_per_channel() {
        let mut tensors = TensorMap::from([(
            "image".to_string(),
            Tensor::from_shape_vec(&[1, 3, 1, 2], vec![10.0, 20.0, 30.0, 40.0, 50.0, 60.0])
                .unwrap(),
        )]);
        let transform = normalize("image", [10.0, 30.0, 50.0], [10.0, 10.0, 5.0]);
        transform(&mut tensors).unwrap();
        assert_eq!(
            &*tensors["image"].values(),
            &[0.0, 1.0, 0.0, 1.0, 0.0, 2.0]
        );
    }
}
