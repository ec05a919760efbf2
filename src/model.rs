pub mod executor;
pub mod sam;
pub mod step;
pub mod tensor;

pub use executor::{GraphExecutor, OnnxExecutor, SequentialGraph};
pub use step::{Model, Outcome, ScheduleStatus};
pub use tensor::{Tensor, TensorMap};
